//! Configuration file management.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Transport settings.
    #[serde(default)]
    pub transport: TransportConfig,
    /// Calendar sync settings.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Store settings.
    #[serde(default)]
    pub store: StoreConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Requested ATT MTU. 0 = implementation maximum.
    #[serde(default)]
    pub mtu_override: u32,
    /// Retry budget for connect/MTU/discovery steps.
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mtu_override: 0,
            max_retry: default_max_retry(),
        }
    }
}

/// Calendar sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Debounce for platform change notifications, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Width of the day-aligned sync window, in days.
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    /// Keys of the calendars to sync.
    #[serde(default)]
    pub tracked_calendars: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            window_days: default_window_days(),
            tracked_calendars: Vec::new(),
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

fn default_max_retry() -> u32 {
    3
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_window_days() -> u32 {
    7
}

impl DaemonConfig {
    /// Load from `$TETHER_CONFIG` or the default path; missing file means
    /// defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("TETHER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_path());
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(toml::from_str(&raw)?)
    }

    fn default_path() -> PathBuf {
        PathBuf::from("tether.toml")
    }

    /// Resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        if self.store.data_dir.is_empty() {
            PathBuf::from(".tether")
        } else {
            PathBuf::from(&self.store.data_dir)
        }
    }
}
