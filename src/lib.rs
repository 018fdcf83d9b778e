//! Call Trigger - WebSocket listener daemon
//!
//! Keeps one WebSocket connection to a configured command server alive and
//! places a phone call whenever the server sends `CALL`.

pub mod call;
pub mod client;
pub mod config;
pub mod destination;
pub mod dispatcher;
pub mod error;
pub mod machine;
pub mod notifier;
pub mod reachability;
pub mod status;
pub mod store;
pub mod supervisor;

pub use error::{Error, Result};
