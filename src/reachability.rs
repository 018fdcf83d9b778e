//! Network reachability probe
//!
//! Answers "is any transport up", not "is the endpoint reachable".

use crate::config::Config;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

pub trait Reachability: Send + Sync {
    fn is_available(&self) -> bool;
}

/// Reads interface state from sysfs (`/sys/class/net/<iface>/operstate`)
pub struct InterfaceProbe {
    net_class_dir: PathBuf,
}

impl InterfaceProbe {
    pub fn new(config: &Config) -> Self {
        Self::at(&config.net_class_dir)
    }

    pub fn at(net_class_dir: &Path) -> Self {
        Self {
            net_class_dir: net_class_dir.to_path_buf(),
        }
    }

    fn interface_up(dir: &Path) -> bool {
        let read = |name: &str| {
            fs::read_to_string(dir.join(name))
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };

        match read("operstate").as_str() {
            "up" => true,
            // Point-to-point links (tun, wireguard) report "unknown"
            "unknown" => read("carrier") == "1",
            _ => false,
        }
    }
}

impl Reachability for InterfaceProbe {
    fn is_available(&self) -> bool {
        let entries = match fs::read_dir(&self.net_class_dir) {
            Ok(entries) => entries,
            Err(e) => {
                // No sysfs: let the connection attempt decide
                debug!(
                    "Cannot read {}: {}, assuming network available",
                    self.net_class_dir.display(),
                    e
                );
                return true;
            }
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name() != "lo")
            .any(|entry| Self::interface_up(&entry.path()))
    }
}

/// Fixed answer that can be flipped at runtime
#[derive(Debug)]
pub struct StaticReachability {
    available: AtomicBool,
}

impl StaticReachability {
    pub fn new(available: bool) -> Self {
        Self {
            available: AtomicBool::new(available),
        }
    }

    pub fn set(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl Reachability for StaticReachability {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn add_iface(root: &Path, name: &str, operstate: &str, carrier: Option<&str>) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("operstate"), format!("{}\n", operstate)).unwrap();
        if let Some(c) = carrier {
            fs::write(dir.join("carrier"), format!("{}\n", c)).unwrap();
        }
    }

    #[test]
    fn test_wifi_up() {
        let temp = TempDir::new().unwrap();
        add_iface(temp.path(), "lo", "unknown", Some("1"));
        add_iface(temp.path(), "wlan0", "up", Some("1"));
        assert!(InterfaceProbe::at(temp.path()).is_available());
    }

    #[test]
    fn test_only_loopback() {
        let temp = TempDir::new().unwrap();
        add_iface(temp.path(), "lo", "unknown", Some("1"));
        add_iface(temp.path(), "wlan0", "down", None);
        assert!(!InterfaceProbe::at(temp.path()).is_available());
    }

    #[test]
    fn test_tunnel_with_carrier() {
        let temp = TempDir::new().unwrap();
        add_iface(temp.path(), "rmnet0", "unknown", Some("1"));
        assert!(InterfaceProbe::at(temp.path()).is_available());

        let temp2 = TempDir::new().unwrap();
        add_iface(temp2.path(), "rmnet0", "unknown", Some("0"));
        assert!(!InterfaceProbe::at(temp2.path()).is_available());
    }

    #[test]
    fn test_missing_sysfs_assumes_available() {
        let temp = TempDir::new().unwrap();
        assert!(InterfaceProbe::at(&temp.path().join("absent")).is_available());
    }

    #[test]
    fn test_static_flip() {
        let reachability = StaticReachability::new(false);
        assert!(!reachability.is_available());
        reachability.set(true);
        assert!(reachability.is_available());
    }
}
