//! Configuration management for spoolbridge
//!
//! Handles loading and validation of `spoolbridge.toml` files. Every table
//! is optional; omitted fields fall back to the defaults below.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::logging::LogConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Streaming batch settings
    #[serde(default)]
    pub stream: StreamConfig,

    /// Spool location and naming
    #[serde(default)]
    pub spool: SpoolConfig,

    /// Synchronous (ad-hoc batch) mode settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Shutdown settings
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LogConfig,
}

/// Streaming producer/consumer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Records per numbered batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum announced-but-unconsumed batches before the producer waits
    #[serde(default = "default_throttle_limit")]
    pub throttle_limit: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            throttle_limit: default_throttle_limit(),
        }
    }
}

fn default_batch_size() -> usize {
    50
}

fn default_throttle_limit() -> u64 {
    30
}

/// Spool directory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpoolConfig {
    /// Directory holding batch files; a RAM-backed mount is recommended
    #[serde(default = "default_spool_dir")]
    pub dir: PathBuf,

    /// File name prefix; batch files are named `<prefix>_<id>`
    #[serde(default = "default_spool_prefix")]
    pub prefix: String,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            dir: default_spool_dir(),
            prefix: default_spool_prefix(),
        }
    }
}

fn default_spool_dir() -> PathBuf {
    PathBuf::from("/dev/shm")
}

fn default_spool_prefix() -> String {
    "spoolbridge_in".to_string()
}

/// Synchronous bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Total worker polls before giving up on an ad-hoc batch
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Delay between polls (milliseconds)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Multiplier applied to the delay after each poll; 1.0 keeps it fixed
    #[serde(default = "default_retry_backoff_factor")]
    pub retry_backoff_factor: f64,

    /// Upper bound on the delay once backoff kicks in (milliseconds)
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Random jitter as a fraction of each delay, 0.0 to 1.0
    #[serde(default)]
    pub retry_jitter: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_backoff_factor: default_retry_backoff_factor(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_jitter: 0.0,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    #[must_use]
    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

fn default_retry_attempts() -> u32 {
    10
}

fn default_retry_delay_ms() -> u64 {
    1000
}

const fn default_retry_backoff_factor() -> f64 {
    1.0
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

/// Shutdown settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Pause after asking the worker to stop, before joining it (milliseconds)
    #[serde(default = "default_drain_delay_ms")]
    pub drain_delay_ms: u64,

    /// Upper bound on waiting for the background worker run (milliseconds)
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_delay_ms: default_drain_delay_ms(),
            join_timeout_ms: default_join_timeout_ms(),
        }
    }
}

impl ShutdownConfig {
    #[must_use]
    pub fn drain_delay(&self) -> Duration {
        Duration::from_millis(self.drain_delay_ms)
    }

    #[must_use]
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

fn default_drain_delay_ms() -> u64 {
    1000
}

fn default_join_timeout_ms() -> u64 {
    5000
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-friendly output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "unknown log format: {s}. Expected one of: pretty, json"
            )),
        }
    }
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }
        let text = std::fs::read_to_string(path).map_err(|err| {
            ConfigError::ReadFailed(path.display().to_string(), err.to_string())
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| ConfigError::ParseFailed(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the bridge cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.stream.batch_size == 0 {
            return Err(ConfigError::ValidationError("stream.batch_size must be >= 1".into()).into());
        }
        if self.stream.throttle_limit == 0 {
            return Err(
                ConfigError::ValidationError("stream.throttle_limit must be >= 1".into()).into(),
            );
        }
        if self.sync.retry_attempts == 0 {
            return Err(
                ConfigError::ValidationError("sync.retry_attempts must be >= 1".into()).into(),
            );
        }
        if self.sync.retry_backoff_factor.is_nan() || self.sync.retry_backoff_factor < 1.0 {
            return Err(ConfigError::ValidationError(
                "sync.retry_backoff_factor must be >= 1.0".into(),
            )
            .into());
        }
        if !(0.0..=1.0).contains(&self.sync.retry_jitter) {
            return Err(ConfigError::ValidationError(
                "sync.retry_jitter must be between 0.0 and 1.0".into(),
            )
            .into());
        }
        if self.sync.retry_max_delay_ms < self.sync.retry_delay_ms {
            return Err(ConfigError::ValidationError(
                "sync.retry_max_delay_ms must be >= sync.retry_delay_ms".into(),
            )
            .into());
        }
        if self.spool.dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError("spool.dir must not be empty".into()).into());
        }
        if self.spool.prefix.is_empty() {
            return Err(
                ConfigError::ValidationError("spool.prefix must not be empty".into()).into(),
            );
        }
        if self.spool.prefix.contains('/') {
            return Err(ConfigError::ValidationError(format!(
                "spool.prefix must be a file name, got {:?}",
                self.spool.prefix
            ))
            .into());
        }
        Ok(())
    }
}
