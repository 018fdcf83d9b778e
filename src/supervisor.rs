//! Connection supervisor
//!
//! One background loop per supervisor. It polls the settings store on a fixed
//! interval, opens the socket when the network is up and nothing is live, and
//! applies client events in arrival order. All state changes happen on that
//! loop, which is the only writer to the status hub.

use crate::call::CallAction;
use crate::client::{
    event_channel, ClientEnvelope, ClientEvent, ConnectionClient, EventReceiver, EventSender,
};
use crate::config::Config;
use crate::dispatcher::CommandDispatcher;
use crate::machine::{Action, Machine, Step};
use crate::reachability::Reachability;
use crate::status::{ConnectionState, StatusHub, Subscription};
use crate::store::SettingsStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
struct LoopContext {
    store: Arc<dyn SettingsStore>,
    reachability: Arc<dyn Reachability>,
    dispatcher: Arc<CommandDispatcher>,
    status: Arc<StatusHub>,
    poll_interval: Duration,
    connect_timeout: Duration,
    heartbeat: Duration,
}

impl LoopContext {
    fn client(&self, events: EventSender) -> ConnectionClient {
        ConnectionClient::new(events, self.connect_timeout, self.heartbeat)
    }
}

struct RunningLoop {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct Supervisor {
    ctx: LoopContext,
    running: Option<RunningLoop>,
}

impl Supervisor {
    pub fn new(
        config: &Config,
        store: Arc<dyn SettingsStore>,
        reachability: Arc<dyn Reachability>,
        action: Arc<dyn CallAction>,
    ) -> Self {
        let dispatcher = Arc::new(CommandDispatcher::new(store.clone(), action));
        Self {
            ctx: LoopContext {
                store,
                reachability,
                dispatcher,
                status: Arc::new(StatusHub::new(config.status_capacity)),
                poll_interval: config.poll_interval(),
                connect_timeout: config.connect_timeout(),
                heartbeat: config.heartbeat_interval(),
            },
            running: None,
        }
    }

    pub fn status(&self) -> &Arc<StatusHub> {
        &self.ctx.status
    }

    pub fn subscribe(&self) -> Subscription {
        self.ctx.status.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.ctx.status.current()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start the reconnect loop. A loop that is already running is stopped
    /// first, so two loops never overlap.
    pub async fn start(&mut self) {
        if self.running.is_some() {
            info!("Restarting connection supervisor");
            self.stop().await;
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_loop(self.ctx.clone(), shutdown_rx));
        self.running = Some(RunningLoop { shutdown, task });
        info!("Connection supervisor started");
    }

    /// Pick up new settings by starting a fresh loop
    pub async fn restart(&mut self) {
        self.start().await;
    }

    /// Cancel the loop, close the socket, publish `Disconnected`. Returns
    /// once all three have happened.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown.send(());
        if let Err(e) = running.task.await {
            error!("Supervisor loop ended abnormally: {}", e);
            // The loop never got to publish its final state
            if self.ctx.status.current() != ConnectionState::Disconnected {
                self.ctx.status.publish(ConnectionState::Disconnected);
            }
        }
        info!("Connection supervisor stopped");
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown.send(());
        }
    }
}

async fn run_loop(ctx: LoopContext, mut shutdown: oneshot::Receiver<()>) {
    let (events_tx, mut events_rx) = event_channel();
    let mut client = ctx.client(events_tx);
    let mut machine = Machine::new();

    let mut ticker = tokio::time::interval(ctx.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            Some(envelope) = events_rx.recv() => {
                handle_event(&ctx, &mut client, &mut machine, envelope);
            }
            _ = ticker.tick() => {
                poll(&ctx, &mut client, &mut machine);
            }
        }
    }

    client.close();
    drain_stale(&mut events_rx);
    if let Some(state) = machine.on_stop() {
        ctx.status.publish(state);
    }
}

fn poll(ctx: &LoopContext, client: &mut ConnectionClient, machine: &mut Machine) {
    let step = match ctx.store.endpoint() {
        Ok(endpoint) if endpoint.is_empty() => machine.on_tick(&endpoint, false),
        Ok(endpoint) => {
            let reachable = ctx.reachability.is_available();
            if !reachable {
                debug!("Network unavailable, not connecting");
            }
            machine.on_tick(&endpoint, reachable)
        }
        Err(e) => {
            warn!("Failed to read settings: {}", e);
            machine.unconfigured(format!("settings unreadable: {}", e))
        }
    };
    apply(ctx, client, step);
}

fn apply(ctx: &LoopContext, client: &mut ConnectionClient, step: Step) {
    for state in step.transitions {
        ctx.status.publish(state);
    }
    match step.action {
        Action::Open(endpoint) => {
            info!("Connecting to {}", endpoint);
            client.open(&endpoint);
        }
        Action::Close => client.close(),
        Action::Idle => {}
    }
}

fn handle_event(
    ctx: &LoopContext,
    client: &mut ConnectionClient,
    machine: &mut Machine,
    envelope: ClientEnvelope,
) {
    if !client.is_current(envelope.id) {
        debug!("Dropping event from closed connection {}", envelope.id);
        return;
    }

    if let ClientEvent::Message(payload) = &envelope.event {
        ctx.dispatcher.dispatch(payload);
    }
    if envelope.event.is_terminal() {
        client.settle(envelope.id);
    }
    if let Some(state) = machine.on_event(&envelope.event) {
        ctx.status.publish(state);
    }
}

/// Discard whatever closed connections left in the channel
fn drain_stale(events_rx: &mut EventReceiver) {
    let mut dropped = 0;
    while events_rx.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        debug!("Discarded {} events on shutdown", dropped);
    }
}
