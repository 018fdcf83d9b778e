//! Connection state and status broadcasting
//!
//! The hub is written only by the supervisor loop, so subscribers see
//! transitions in the order they happened. Any number of subscribers may be
//! attached; dropping a [`Subscription`] or [`SubscriptionHandle`] detaches it.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl ConnectionState {
    /// A socket is open or being opened
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ConnectionState::Error(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Error(message) => write!(f, "error: {}", message),
        }
    }
}

pub struct StatusHub {
    events: broadcast::Sender<ConnectionState>,
    current: watch::Sender<ConnectionState>,
}

impl StatusHub {
    /// `capacity` bounds how far a subscriber may fall behind before it skips states
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let (current, _) = watch::channel(ConnectionState::Disconnected);
        Self { events, current }
    }

    pub fn current(&self) -> ConnectionState {
        self.current.borrow().clone()
    }

    pub(crate) fn publish(&self, state: ConnectionState) {
        info!("Connection status: {}", state);
        self.current.send_replace(state.clone());
        // No subscribers is fine
        let _ = self.events.send(state);
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.events.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Run `callback` for every transition on a background task. Must be
    /// called from within a tokio runtime.
    pub fn on_change<F>(&self, mut callback: F) -> SubscriptionHandle
    where
        F: FnMut(&ConnectionState) + Send + 'static,
    {
        let mut sub = self.subscribe();
        let task = tokio::spawn(async move {
            while let Some(state) = sub.recv().await {
                callback(&state);
            }
        });
        SubscriptionHandle::from_task(task)
    }
}

impl Default for StatusHub {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Ordered stream of state transitions
pub struct Subscription {
    rx: broadcast::Receiver<ConnectionState>,
}

impl Subscription {
    /// Next transition, or `None` once the hub is gone
    pub async fn recv(&mut self) -> Option<ConnectionState> {
        loop {
            match self.rx.recv().await {
                Ok(state) => return Some(state),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Status subscriber lagged, skipped {} states", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-published transition, without waiting
    pub fn try_recv(&mut self) -> Option<ConnectionState> {
        loop {
            match self.rx.try_recv() {
                Ok(state) => return Some(state),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Status subscriber lagged, skipped {} states", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

/// Callback subscription; detached when dropped
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub(crate) fn from_task(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    pub fn unsubscribe(self) {}
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
