//! Settings store - persistent key/value storage for endpoint and destination
//!
//! Values are re-read on every access so that a change written by the CLI is
//! picked up by the running daemon on its next poll.

use crate::config::Config;
use crate::destination::{normalize_number, Destination};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use tracing::warn;

pub const ENDPOINT_KEY: &str = "websocket_url";
pub const DESTINATION_KEY: &str = "phone_number";
pub const DESTINATION_NORMALIZED_KEY: &str = "phone_number_normalized";

/// Key/value persistence. Missing keys read as the empty string.
pub trait SettingsStore: Send + Sync {
    fn read(&self, key: &str) -> Result<String>;

    fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Write several keys so that no reader sees only some of them
    fn write_all(&self, entries: &[(&str, &str)]) -> Result<()>;

    /// Configured endpoint, empty when unconfigured
    fn endpoint(&self) -> Result<String> {
        Ok(self.read(ENDPOINT_KEY)?.trim().to_string())
    }

    fn set_endpoint(&self, endpoint: &str) -> Result<()> {
        self.write(ENDPOINT_KEY, endpoint.trim())
    }

    /// The raw number is authoritative; a normalized value that disagrees
    /// with it (hand edit, older writer) is ignored.
    fn destination(&self) -> Result<Destination> {
        let raw = self.read(DESTINATION_KEY)?;
        let stored = self.read(DESTINATION_NORMALIZED_KEY)?;
        let normalized = normalize_number(&raw);
        if !stored.is_empty() && stored != normalized {
            warn!(
                "Stored normalized number {} does not match {}, using {}",
                stored, raw, normalized
            );
        }
        Ok(Destination { raw, normalized })
    }

    fn set_destination(&self, raw: &str) -> Result<Destination> {
        let dest = Destination::new(raw);
        self.write_all(&[
            (DESTINATION_KEY, dest.raw.as_str()),
            (DESTINATION_NORMALIZED_KEY, dest.normalized.as_str()),
        ])?;
        Ok(dest)
    }
}

/// JSON object on disk, rewritten atomically on every write
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(config: &Config) -> Self {
        Self::at(&config.settings_file)
    }

    pub fn at(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, data: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to temp file in same directory (for atomic rename)
        let parent = self.path.parent().unwrap_or(Path::new("."));
        let mut temp = NamedTempFile::new_in(parent)?;

        let json = serde_json::to_string_pretty(data)?;
        temp.write_all(json.as_bytes())?;
        temp.as_file().sync_all()?;

        temp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        Ok(())
    }
}

impl SettingsStore for JsonFileStore {
    fn read(&self, key: &str) -> Result<String> {
        Ok(self.load()?.remove(key).unwrap_or_default())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.write_all(&[(key, value)])
    }

    fn write_all(&self, entries: &[(&str, &str)]) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| Error::Config("settings lock poisoned".to_string()))?;
        let mut data = self.load()?;
        for (key, value) in entries {
            data.insert(key.to_string(), value.to_string());
        }
        self.save(&data)
    }
}

/// In-process store, for tests and embedding
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn read(&self, key: &str) -> Result<String> {
        let data = self
            .data
            .lock()
            .map_err(|_| Error::Config("settings lock poisoned".to_string()))?;
        Ok(data.get(key).cloned().unwrap_or_default())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.write_all(&[(key, value)])
    }

    fn write_all(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| Error::Config("settings lock poisoned".to_string()))?;
        for (key, value) in entries {
            data.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }
}
