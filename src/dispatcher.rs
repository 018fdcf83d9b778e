//! Inbound command dispatch
//!
//! Only the exact payload `CALL` means anything. Everything else is dropped.

use crate::call::CallAction;
use crate::store::SettingsStore;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Payload that places the call. Compared case-sensitively, untrimmed.
pub const CALL_TRIGGER: &str = "CALL";

/// Outcome of one inbound payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Ignored,
    CallPlaced(String),
    NoDestination,
}

pub struct CommandDispatcher {
    store: Arc<dyn SettingsStore>,
    action: Arc<dyn CallAction>,
}

impl CommandDispatcher {
    pub fn new(store: Arc<dyn SettingsStore>, action: Arc<dyn CallAction>) -> Self {
        Self { store, action }
    }

    pub fn is_trigger(payload: &str) -> bool {
        payload == CALL_TRIGGER
    }

    /// Every trigger fires its own call; there is no debounce.
    pub fn dispatch(&self, payload: &str) -> Dispatch {
        if !Self::is_trigger(payload) {
            debug!(
                "Ignoring payload: {}",
                payload.chars().take(50).collect::<String>()
            );
            return Dispatch::Ignored;
        }

        // Read at trigger time so a number saved a second ago is used
        let destination = match self.store.destination() {
            Ok(d) => d,
            Err(e) => {
                error!("Failed to read phone number: {}", e);
                return Dispatch::NoDestination;
            }
        };

        if destination.is_empty() {
            error!("Trigger received but no phone number is configured");
            return Dispatch::NoDestination;
        }

        info!("Trigger received, calling {}", destination.raw);
        self.action.place_call(&destination.normalized);
        Dispatch::CallPlaced(destination.normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCall {
        calls: Mutex<Vec<String>>,
    }

    impl CallAction for RecordingCall {
        fn place_call(&self, number: &str) {
            self.calls.lock().unwrap().push(number.to_string());
        }
    }

    fn setup(number: &str) -> (CommandDispatcher, Arc<RecordingCall>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.set_destination(number).unwrap();
        let action = Arc::new(RecordingCall::default());
        let dispatcher = CommandDispatcher::new(store.clone(), action.clone());
        (dispatcher, action, store)
    }

    #[test]
    fn test_call_triggers_once() {
        let (dispatcher, action, _) = setup("0120-961-678");
        assert_eq!(
            dispatcher.dispatch("CALL"),
            Dispatch::CallPlaced("0120961678".to_string())
        );
        assert_eq!(*action.calls.lock().unwrap(), vec!["0120961678"]);
    }

    #[test]
    fn test_near_misses_ignored() {
        let (dispatcher, action, _) = setup("0120961678");
        for payload in ["call", "CALL ", " CALL", "HANGUP", "", "CALL\n"] {
            assert_eq!(dispatcher.dispatch(payload), Dispatch::Ignored, "{:?}", payload);
        }
        assert!(action.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_repeated_triggers_not_debounced() {
        let (dispatcher, action, _) = setup("0120961678");
        dispatcher.dispatch("CALL");
        dispatcher.dispatch("CALL");
        dispatcher.dispatch("CALL");
        assert_eq!(action.calls.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_no_destination() {
        let (dispatcher, action, _) = setup("");
        assert_eq!(dispatcher.dispatch("CALL"), Dispatch::NoDestination);
        assert!(action.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_number_read_at_trigger_time() {
        let (dispatcher, action, store) = setup("111");
        store.set_destination("222-333").unwrap();
        dispatcher.dispatch("CALL");
        assert_eq!(*action.calls.lock().unwrap(), vec!["222333"]);
    }
}
