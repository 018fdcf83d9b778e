//! Call placement
//!
//! The core only fires the action; whether the call goes through is the
//! dialer's business.

use crate::config::Config;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio::runtime::Handle;
use tracing::{debug, error, info};

pub trait CallAction: Send + Sync {
    /// Fire-and-forget. `number` is already normalized.
    fn place_call(&self, number: &str);
}

/// Runs an external dialer program with the number as its only argument
pub struct DialerCommand {
    program: PathBuf,
}

impl DialerCommand {
    pub fn new(config: &Config) -> Self {
        Self {
            program: config.dialer.clone(),
        }
    }
}

impl CallAction for DialerCommand {
    /// Needs a tokio runtime to reap the dialer; without one the call is not placed.
    fn place_call(&self, number: &str) {
        let Ok(runtime) = Handle::try_current() else {
            error!("Cannot dial {}: no async runtime", number);
            return;
        };

        let spawned = Command::new(&self.program)
            .arg(number)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(mut child) => {
                info!("Dialing {} via {}", number, self.program.display());
                // Reap the child without blocking the caller
                let program = self.program.clone();
                runtime.spawn(async move {
                    match child.wait().await {
                        Ok(status) if status.success() => debug!("Dialer exited cleanly"),
                        Ok(status) => {
                            error!("Dialer {} exited with {}", program.display(), status)
                        }
                        Err(e) => error!("Failed to wait for dialer: {}", e),
                    }
                });
            }
            Err(e) => error!("Failed to start dialer {}: {}", self.program.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_dialer_receives_number() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("dialed.txt");
        let script = temp.path().join("dial");
        fs::write(
            &script,
            format!("#!/bin/sh\necho \"$1\" > {}\n", out.display()),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = Config::for_test(temp.path());
        config.dialer = script;
        DialerCommand::new(&config).place_call("0120961678");

        let deadline = Instant::now() + Duration::from_secs(5);
        while !out.exists() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let dialed = fs::read_to_string(&out).unwrap();
        assert_eq!(dialed.trim(), "0120961678");
    }

    #[tokio::test]
    async fn test_missing_dialer_does_not_panic() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::for_test(temp.path());
        config.dialer = temp.path().join("no-such-dialer");
        DialerCommand::new(&config).place_call("0120961678");
    }

    #[test]
    fn test_no_runtime_does_not_panic() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("dialed.txt");
        let script = temp.path().join("dial");
        fs::write(
            &script,
            format!("#!/bin/sh\necho \"$1\" > {}\n", out.display()),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = Config::for_test(temp.path());
        config.dialer = script;
        DialerCommand::new(&config).place_call("0120961678");

        std::thread::sleep(Duration::from_millis(300));
        assert!(!out.exists());
    }
}
