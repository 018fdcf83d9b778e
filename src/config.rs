//! Configuration and paths

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fixed reconnect cadence of the supervisor loop.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on a single WebSocket handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(4);

/// Ping cadence on an open socket. Two silent intervals mean the peer is gone.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default external program used to place calls. Receives the number as its only argument.
pub const DEFAULT_DIALER: &str = "termux-telephony-call";

/// All configurable paths and constants
#[derive(Debug, Clone)]
pub struct Config {
    pub base_dir: PathBuf,
    pub settings_file: PathBuf,
    pub state_dir: PathBuf,
    pub pid_file: PathBuf,
    pub status_file: PathBuf,
    pub logs_dir: PathBuf,
    pub dialer: PathBuf,
    pub net_class_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub status_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::with_base_dir(&home.join(".call-trigger"))
    }
}

impl Config {
    /// Lay out every path under `base_dir`
    pub fn with_base_dir(base_dir: &Path) -> Self {
        let state_dir = base_dir.join("state");
        Self {
            settings_file: base_dir.join("settings.json"),
            pid_file: state_dir.join("daemon.pid"),
            status_file: state_dir.join("status.json"),
            logs_dir: base_dir.join("logs"),
            dialer: PathBuf::from(DEFAULT_DIALER),
            net_class_dir: PathBuf::from("/sys/class/net"),
            poll_interval_ms: POLL_INTERVAL.as_millis() as u64,
            connect_timeout_ms: CONNECT_TIMEOUT.as_millis() as u64,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL.as_millis() as u64,
            status_capacity: 64,
            state_dir,
            base_dir: base_dir.to_path_buf(),
        }
    }

    /// Create config for testing with custom paths and fast timings
    pub fn for_test(temp_dir: &Path) -> Self {
        Self {
            dialer: temp_dir.join("dial"),
            net_class_dir: temp_dir.join("net"),
            poll_interval_ms: 50,
            connect_timeout_ms: 200,
            heartbeat_interval_ms: 1000,
            ..Self::with_base_dir(temp_dir)
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs_dir.join("manager.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.settings_file.ends_with(".call-trigger/settings.json"));
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.dialer, PathBuf::from(DEFAULT_DIALER));
    }

    #[test]
    fn test_test_config() {
        let temp = std::env::temp_dir();
        let config = Config::for_test(&temp);
        assert_eq!(config.base_dir, temp);
        assert_eq!(config.status_file, temp.join("state/status.json"));
        assert!(config.poll_interval() < POLL_INTERVAL);
    }

    #[test]
    fn test_handshake_fits_in_poll_interval() {
        assert!(CONNECT_TIMEOUT < POLL_INTERVAL);
    }
}
