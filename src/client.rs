//! WebSocket connection client
//!
//! Owns at most one socket. Lifecycle events go out on a single ordered
//! channel, tagged with the id of the connection that produced them, so the
//! consumer can drop anything from a connection it already closed.

use crate::error::{Error, Result};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

pub type ConnectionId = u64;

/// Close code used when the peer vanished without a close frame
const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code used when the peer sent a close frame without a status
const NO_STATUS: u16 = 1005;

/// How long to wait for the peer to finish a close handshake
const CLOSE_DRAIN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Opened,
    Message(String),
    Closed { code: u16, reason: String },
    Failed(String),
}

impl ClientEvent {
    /// The connection that emitted this is finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, ClientEvent::Closed { .. } | ClientEvent::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEnvelope {
    pub id: ConnectionId,
    pub event: ClientEvent,
}

pub type EventSender = mpsc::UnboundedSender<ClientEnvelope>;
pub type EventReceiver = mpsc::UnboundedReceiver<ClientEnvelope>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Validate an endpoint: `ws` or `wss` with a host
pub fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(Error::InvalidEndpoint("endpoint not configured".to_string()));
    }

    let url = Url::parse(endpoint)
        .map_err(|e| Error::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(Error::InvalidEndpoint(format!(
                "{}: unsupported scheme '{}'",
                endpoint, other
            )))
        }
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(Error::InvalidEndpoint(format!("{}: missing host", endpoint)));
    }

    Ok(url)
}

struct ActiveConnection {
    id: ConnectionId,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

pub struct ConnectionClient {
    events: EventSender,
    connect_timeout: Duration,
    heartbeat: Duration,
    next_id: ConnectionId,
    active: Option<ActiveConnection>,
}

impl ConnectionClient {
    /// `heartbeat` is the ping cadence once open; a peer silent for two
    /// heartbeats is treated as gone.
    pub fn new(events: EventSender, connect_timeout: Duration, heartbeat: Duration) -> Self {
        Self {
            events,
            connect_timeout,
            heartbeat,
            next_id: 0,
            active: None,
        }
    }

    /// Start connecting to `endpoint`, closing any existing connection first.
    /// A bad endpoint is reported as a `Failed` event, not an error. Must be
    /// called from within a tokio runtime.
    pub fn open(&mut self, endpoint: &str) -> ConnectionId {
        self.close();

        self.next_id += 1;
        let id = self.next_id;

        match parse_endpoint(endpoint) {
            Ok(url) => {
                debug!("Opening connection {} to {}", id, url);
                let (shutdown_tx, shutdown_rx) = oneshot::channel();
                let task = tokio::spawn(run_connection(
                    id,
                    url,
                    self.connect_timeout,
                    self.heartbeat,
                    self.events.clone(),
                    shutdown_rx,
                ));
                self.active = Some(ActiveConnection {
                    id,
                    shutdown: Some(shutdown_tx),
                    task: Some(task),
                });
            }
            Err(e) => {
                warn!("Not connecting: {}", e);
                self.active = Some(ActiveConnection {
                    id,
                    shutdown: None,
                    task: None,
                });
                let _ = self.events.send(ClientEnvelope {
                    id,
                    event: ClientEvent::Failed(e.to_string()),
                });
            }
        }

        id
    }

    /// Idempotent. Events from the closed connection are no longer current.
    pub fn close(&mut self) {
        if let Some(mut active) = self.active.take() {
            debug!("Closing connection {}", active.id);
            if let Some(shutdown) = active.shutdown.take() {
                // The task finishes the close handshake on its own
                let _ = shutdown.send(());
            }
            drop(active.task.take());
        }
    }

    /// Whether `id` is the connection this client currently owns
    pub fn is_current(&self, id: ConnectionId) -> bool {
        self.active.as_ref().is_some_and(|a| a.id == id)
    }

    /// Forget a connection that ended on its own
    pub fn settle(&mut self, id: ConnectionId) {
        if self.is_current(id) {
            self.active = None;
        }
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for ConnectionClient {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_connection(
    id: ConnectionId,
    url: Url,
    connect_timeout: Duration,
    heartbeat: Duration,
    events: EventSender,
    mut shutdown: oneshot::Receiver<()>,
) {
    let emit = |event: ClientEvent| {
        let _ = events.send(ClientEnvelope { id, event });
    };

    let connect = tokio::time::timeout(connect_timeout, connect_async(url.as_str()));
    let stream = tokio::select! {
        _ = &mut shutdown => {
            debug!("Connection {} cancelled during handshake", id);
            return;
        }
        result = connect => match result {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                emit(ClientEvent::Failed(Error::from(e).to_string()));
                return;
            }
            Err(_) => {
                emit(ClientEvent::Failed(Error::ConnectTimeout(connect_timeout).to_string()));
                return;
            }
        }
    };

    info!("Connected to {}", url);
    emit(ClientEvent::Opened);

    let (mut write, mut read) = stream.split();

    let mut pings = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
    pings.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_read = Instant::now();

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client closing".into(),
                };
                if let Err(e) = write.send(Message::Close(Some(frame))).await {
                    debug!("Close frame not sent on connection {}: {}", id, e);
                }
                let _ = tokio::time::timeout(CLOSE_DRAIN, async {
                    while let Some(Ok(_)) = read.next().await {}
                })
                .await;
                return;
            }
            _ = pings.tick() => {
                let silent = last_read.elapsed();
                if silent >= heartbeat * 2 {
                    warn!("No data on connection {} for {:?}", id, silent);
                    emit(ClientEvent::Failed(Error::ConnectionLost(silent).to_string()));
                    return;
                }
                // A half-open socket can also stall the write
                match tokio::time::timeout(heartbeat, write.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        emit(ClientEvent::Failed(Error::from(e).to_string()));
                        return;
                    }
                    Err(_) => {
                        emit(ClientEvent::Failed(
                            Error::ConnectionLost(last_read.elapsed()).to_string(),
                        ));
                        return;
                    }
                }
            }
            msg = read.next() => {
                last_read = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => emit(ClientEvent::Message(text)),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.into_owned()))
                            .unwrap_or((NO_STATUS, String::new()));
                        info!("Server closed connection {} ({} {})", id, code, reason);
                        emit(ClientEvent::Closed { code, reason });
                        // Let tungstenite flush the close reply
                        let _ = tokio::time::timeout(CLOSE_DRAIN, async {
                            while let Some(Ok(_)) = read.next().await {}
                        })
                        .await;
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        emit(ClientEvent::Failed(Error::from(e).to_string()));
                        return;
                    }
                    None => {
                        emit(ClientEvent::Closed {
                            code: ABNORMAL_CLOSURE,
                            reason: "connection dropped".to_string(),
                        });
                        return;
                    }
                }
            }
        }
    }
}
