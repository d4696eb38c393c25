//! Namespace configuration.
//!
//! Loaded from TOML, e.g.:
//!
//! ```toml
//! name = "media"
//!
//! [watch]
//! poll_interval_ms = 1000
//!
//! [[mounts]]
//! source = "/srv/music"
//! at = "/media/music"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for one namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Namespace name (used as the registry key).
    #[serde(default = "default_name")]
    pub name: String,

    /// Change watcher settings.
    #[serde(default)]
    pub watch: WatchConfig,

    /// Local directories to mount at startup.
    #[serde(default)]
    pub mounts: Vec<MountConfig>,
}

fn default_name() -> String {
    "graft".to_string()
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            watch: WatchConfig::default(),
            mounts: Vec::new(),
        }
    }
}

impl NamespaceConfig {
    /// Default configuration with a different name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }
}

/// Change watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Delay between modification-time checks, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval() -> u64 {
    5_000
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl WatchConfig {
    /// Poll interval, never shorter than one millisecond.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// A local directory grafted at a namespace path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// Host directory to expose.
    pub source: PathBuf,

    /// Absolute namespace path to mount it at (created if missing).
    pub at: String,
}
