//! Connection state machine
//!
//! Pure transitions: a poll tick or a client event goes in, the states to
//! publish and the socket action come out. No I/O, so every interleaving can
//! be exercised directly.

use crate::client::ClientEvent;
use crate::status::ConnectionState;

pub const NOT_CONFIGURED: &str = "endpoint not configured";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Idle,
    Open(String),
    Close,
}

/// Result of a poll tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// States to publish, oldest first
    pub transitions: Vec<ConnectionState>,
    pub action: Action,
}

impl Step {
    fn idle() -> Self {
        Self {
            transitions: Vec::new(),
            action: Action::Idle,
        }
    }
}

#[derive(Debug, Default)]
pub struct Machine {
    state: ConnectionState,
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    fn set(&mut self, next: ConnectionState) -> Option<ConnectionState> {
        if self.state == next {
            return None;
        }
        self.state = next.clone();
        Some(next)
    }

    /// One iteration of the reconnect loop
    pub fn on_tick(&mut self, endpoint: &str, reachable: bool) -> Step {
        if endpoint.trim().is_empty() {
            return self.unconfigured(NOT_CONFIGURED.to_string());
        }

        // The live guard also covers an open still in flight
        if !reachable || self.state.is_live() {
            return Step::idle();
        }

        let mut transitions = Vec::new();
        if self.state.is_error() {
            transitions.extend(self.set(ConnectionState::Disconnected));
        }
        transitions.extend(self.set(ConnectionState::Connecting));

        Step {
            transitions,
            action: Action::Open(endpoint.trim().to_string()),
        }
    }

    /// Settings could not be used; drops any live socket
    pub fn unconfigured(&mut self, reason: String) -> Step {
        let was_live = self.state.is_live();
        Step {
            transitions: self.set(ConnectionState::Error(reason)).into_iter().collect(),
            action: if was_live { Action::Close } else { Action::Idle },
        }
    }

    /// Apply an event from the current connection
    pub fn on_event(&mut self, event: &ClientEvent) -> Option<ConnectionState> {
        match event {
            ClientEvent::Opened => self.set(ConnectionState::Connected),
            ClientEvent::Message(_) => None,
            ClientEvent::Closed { .. } => self.set(ConnectionState::Disconnected),
            ClientEvent::Failed(message) => self.set(ConnectionState::Error(message.clone())),
        }
    }

    /// Supervisor is shutting down
    pub fn on_stop(&mut self) -> Option<ConnectionState> {
        self.set(ConnectionState::Disconnected)
    }
}
