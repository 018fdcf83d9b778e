//! Status file
//!
//! The running daemon mirrors every transition into `state/status.json` so
//! that `call-trigger status` can show it from another process.

use crate::error::{Error, Result};
use crate::status::{ConnectionState, StatusHub, SubscriptionHandle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: ConnectionState,
    pub summary: String,
    pub pid: u32,
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn now(state: &ConnectionState) -> Self {
        Self {
            status: state.clone(),
            summary: state.to_string(),
            pid: std::process::id(),
            updated_at: Utc::now(),
        }
    }
}

pub fn write_status(path: &Path, state: &ConnectionState) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let parent = path.parent().unwrap_or(Path::new("."));
    let mut temp = NamedTempFile::new_in(parent)?;
    let json = serde_json::to_string_pretty(&StatusRecord::now(state))?;
    temp.write_all(json.as_bytes())?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Last status written by a daemon, if any
pub fn read_status(path: &Path) -> Result<Option<StatusRecord>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Keep `path` in sync with the hub until the handle is dropped. Writes run
/// on the blocking pool one at a time, so the file always ends on the latest
/// state.
pub fn spawn_status_file(hub: &StatusHub, path: PathBuf) -> SubscriptionHandle {
    let mut sub = hub.subscribe();
    let initial = hub.current();
    let task = tokio::spawn(async move {
        let mut next = Some(initial);
        while let Some(state) = next {
            let target = path.clone();
            let written = tokio::task::spawn_blocking(move || write_status(&target, &state)).await;
            match written {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Failed to write status file {}: {}", path.display(), e),
                Err(e) => warn!("Status file writer stopped: {}", e),
            }
            next = sub.recv().await;
        }
    });
    SubscriptionHandle::from_task(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state/status.json");

        assert!(read_status(&path).unwrap().is_none());

        let state = ConnectionState::Error("endpoint not configured".to_string());
        write_status(&path, &state).unwrap();

        let record = read_status(&path).unwrap().unwrap();
        assert_eq!(record.status, state);
        assert_eq!(record.summary, "error: endpoint not configured");
        assert_eq!(record.pid, std::process::id());
    }

    #[tokio::test]
    async fn test_follows_hub() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("status.json");
        let hub = StatusHub::new(8);
        let _handle = spawn_status_file(&hub, path.clone());

        wait_for_status(&path, &ConnectionState::Disconnected).await;
        hub.publish(ConnectionState::Connected);
        wait_for_status(&path, &ConnectionState::Connected).await;
    }

    #[tokio::test]
    async fn test_burst_ends_on_latest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("status.json");
        let hub = StatusHub::new(64);
        let _handle = spawn_status_file(&hub, path.clone());

        for i in 0..20 {
            hub.publish(ConnectionState::Connecting);
            hub.publish(ConnectionState::Error(format!("attempt {}", i)));
        }
        hub.publish(ConnectionState::Connected);

        wait_for_status(&path, &ConnectionState::Connected).await;
        // Nothing older lands after the latest state
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            read_status(&path).unwrap().unwrap().status,
            ConnectionState::Connected
        );
    }

    async fn wait_for_status(path: &Path, expected: &ConnectionState) {
        for _ in 0..200 {
            if let Ok(Some(record)) = read_status(path) {
                if &record.status == expected {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("status file never showed {}", expected);
    }
}
