//! Engine configuration schema and YAML loader
//!
//! Default location: `<config dir>/transport-sync/config.yaml`
//!
//! Every field has a default, so a partial (or missing) file is valid:
//!
//! ```yaml
//! outbound:
//!   host: "127.0.0.1"
//!   port: 8000
//! inbound:
//!   port: 8002
//! publish_rate_hz: 30.0
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::queue::DEFAULT_QUEUE_CAPACITY;

/// Outbound snapshots per second while the transport is moving
pub const DEFAULT_PUBLISH_RATE_HZ: f64 = 30.0;

/// Root engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Peer that receives /play, /tempo, /position
    pub outbound: OutboundConfig,
    /// Local port the peer reports its transport to
    pub inbound: InboundConfig,
    /// Target rate of rate-limited snapshots
    pub publish_rate_hz: f64,
    /// Snapshots buffered between the audio and sender threads
    pub queue_capacity: usize,
    /// Sender thread timing
    pub sender: SenderConfig,
    /// UI notifications buffered before new ones are dropped
    pub event_capacity: usize,
    /// Sample rate assumed until the host calls `prepare`
    pub default_sample_rate: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            outbound: OutboundConfig::default(),
            inbound: InboundConfig::default(),
            publish_rate_hz: DEFAULT_PUBLISH_RATE_HZ,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            sender: SenderConfig::default(),
            event_capacity: 64,
            default_sample_rate: 44_100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    pub host: String,
    pub port: u16,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundConfig {
    /// Interface to bind (0.0.0.0 = all)
    pub bind_address: String,
    /// 0 picks an ephemeral port
    pub port: u16,
    /// How often the receiver thread checks its stop flag
    pub read_timeout_ms: u64,
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8002,
            read_timeout_ms: 50,
        }
    }
}

impl InboundConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Longest sleep between queue checks when no push wakes the thread
    pub idle_wait_ms: u64,
    /// Bounded wait for the thread to exit at teardown
    pub shutdown_timeout_ms: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            idle_wait_ms: 50,
            shutdown_timeout_ms: 100,
        }
    }
}

impl SenderConfig {
    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl SyncConfig {
    /// Replace unusable values with defaults, logging each replacement
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();

        if !(self.publish_rate_hz.is_finite() && self.publish_rate_hz > 0.0) {
            log::warn!(
                "config: publish_rate_hz {} is invalid, using {}",
                self.publish_rate_hz,
                defaults.publish_rate_hz
            );
            self.publish_rate_hz = defaults.publish_rate_hz;
        }
        if !(self.default_sample_rate.is_finite() && self.default_sample_rate > 0.0) {
            log::warn!(
                "config: default_sample_rate {} is invalid, using {}",
                self.default_sample_rate,
                defaults.default_sample_rate
            );
            self.default_sample_rate = defaults.default_sample_rate;
        }
        if self.queue_capacity == 0 {
            log::warn!("config: queue_capacity 0 is invalid, using {}", defaults.queue_capacity);
            self.queue_capacity = defaults.queue_capacity;
        }
        if self.event_capacity == 0 {
            log::warn!("config: event_capacity 0 is invalid, using {}", defaults.event_capacity);
            self.event_capacity = defaults.event_capacity;
        }
        // A zero socket timeout means "block forever" and would hang shutdown
        if self.inbound.read_timeout_ms == 0 {
            self.inbound.read_timeout_ms = defaults.inbound.read_timeout_ms;
        }
        if self.sender.idle_wait_ms == 0 {
            self.sender.idle_wait_ms = defaults.sender.idle_wait_ms;
        }
        self
    }
}

/// Get the default config file path
///
/// Returns: `<config dir>/transport-sync/config.yaml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("transport-sync")
        .join("config.yaml")
}

/// Load the engine configuration
///
/// A missing file yields defaults silently; an unreadable or invalid file
/// yields defaults with a warning. The result is always sanitized.
pub fn load_config(path: &Path) -> SyncConfig {
    if !path.exists() {
        log::info!("config: {:?} not found, using defaults", path);
        return SyncConfig::default();
    }

    match read_config(path) {
        Ok(config) => {
            log::info!("config: Loaded {:?}", path);
            config.sanitized()
        }
        Err(e) => {
            log::warn!("config: {:#}, using defaults", e);
            SyncConfig::default()
        }
    }
}

fn read_config(path: &Path) -> Result<SyncConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_yaml::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))
}

/// Write the engine configuration, creating parent directories
pub fn save_config(config: &SyncConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write {:?}", path))?;

    log::info!("config: Saved {:?}", path);
    Ok(())
}
