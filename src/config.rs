//! Manager configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! enumerate_existing = true
//! watch_hotplug = true
//! extensions = ["classic-controller", "drums", "guitar"]
//! wait_timeout_ms = 500
//! writable = false
//! log_level = "info"
//! ```

use crate::capability::Capability;
use crate::error::{Error, Result};
use crate::monitor::MonitorOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Report controllers already connected at startup.
    pub enumerate_existing: bool,

    /// Keep watching for controllers connected later.
    pub watch_hotplug: bool,

    /// Capability kinds tracked in the registry.
    pub extensions: Vec<Capability>,

    /// Upper bound on one readiness wait. `None` or `0` waits until something happens.
    pub wait_timeout_ms: Option<u64>,

    /// Open capabilities with write access (LEDs, rumble).
    pub writable: bool,

    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enumerate_existing: true,
            watch_hotplug: true,
            extensions: Capability::DEFAULT_EXTENSIONS.kinds().collect(),
            wait_timeout_ms: Some(500),
            writable: false,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn monitor_options(&self) -> MonitorOptions {
        MonitorOptions {
            enumerate_existing: self.enumerate_existing,
            watch_hotplug: self.watch_hotplug,
        }
    }

    /// Tracked kinds as one mask.
    pub fn tracked(&self) -> Capability {
        self.extensions
            .iter()
            .fold(Capability::empty(), |acc, kind| acc | *kind)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        match self.wait_timeout_ms {
            None | Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
        }
    }
}
