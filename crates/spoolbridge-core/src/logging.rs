//! Structured logging for spoolbridge
//!
//! This module provides the logging infrastructure, using `tracing` with
//! configurable output formats and destinations.
//!
//! # Usage
//!
//! Initialize logging once at startup:
//!
//! ```ignore
//! use spoolbridge_core::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::default())?;
//! ```
//!
//! # Correlation Fields
//!
//! Use these field names consistently in spans and events:
//! - `batch_id`: Numbered batch sequence id
//! - `path`: Spool file or control pipe path
//! - `records`: Record count of a batch
//! - `outstanding`: Announced-but-unconsumed batch count
//! - `attempt`, `max_attempts`: Synchronous poll progress
//!
//! Record payloads are never logged.

use serde::{Deserialize, Serialize};
use std::fs::{DirBuilder, File, OpenOptions};
use std::io;
#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

pub use crate::config::LogFormat;

/// Global flag to track if logging has been initialized
static LOGGING_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error, or an `EnvFilter`
    /// directive). Can be overridden by the RUST_LOG environment variable
    pub level: String,

    /// Output format (pretty or json)
    pub format: LogFormat,

    /// Optional path to log file
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// Error type for logging initialization
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("failed to create log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Open the log file for appending, creating it (mode 0600) and any missing
/// parent directories (mode 0700).
fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let mut dirs = DirBuilder::new();
        dirs.recursive(true);
        #[cfg(unix)]
        dirs.mode(0o700);
        dirs.create(parent)?;
    }
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path)
}

fn build_filter(level: &str) -> Result<EnvFilter, LogError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|_| LogError::InvalidLevel(level.to_string()))
}

/// Install the global subscriber: stderr in the configured format, plus the
/// log file in the same format when one is configured.
///
/// Only the first call succeeds; later ones return
/// [`LogError::AlreadyInitialized`]. `RUST_LOG` overrides `config.level`.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if is_logging_initialized() {
        return Err(LogError::AlreadyInitialized);
    }

    let filter = build_filter(&config.level)?;
    let log_file = config
        .file
        .as_deref()
        .map(open_log_file)
        .transpose()?
        .map(Arc::new);
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Pretty => {
            let file_layer = log_file.map(|file| fmt::layer().with_writer(file).with_ansi(false));
            let stderr_layer = fmt::layer()
                .with_writer(io::stderr)
                .with_span_events(FmtSpan::NONE);
            tracing::subscriber::set_global_default(registry.with(stderr_layer).with(file_layer))?;
        }
        LogFormat::Json => {
            let file_layer = log_file.map(|file| {
                fmt::layer()
                    .json()
                    .with_timer(SystemTime)
                    .with_current_span(true)
                    .flatten_event(true)
                    .with_writer(file)
            });
            let stderr_layer = fmt::layer()
                .json()
                .with_timer(SystemTime)
                .with_current_span(true)
                .with_span_list(false)
                .flatten_event(true)
                .with_writer(io::stderr);
            tracing::subscriber::set_global_default(registry.with(stderr_layer).with(file_layer))?;
        }
    }

    let _ = LOGGING_INITIALIZED.set(true);
    tracing::info!(
        log_level = %config.level,
        log_format = %config.format,
        log_file = ?config.file,
        "Logging initialized"
    );
    Ok(())
}

/// Check if logging has been initialized
pub fn is_logging_initialized() -> bool {
    LOGGING_INITIALIZED.get().is_some()
}

/// Create a span with the bridge correlation fields
///
/// ```ignore
/// let span = spoolbridge_core::bridge_span!("announce", batch_id = 7u64);
/// let _guard = span.enter();
/// ```
#[macro_export]
macro_rules! bridge_span {
    ($name:expr $(, $field:ident = $value:expr)* $(,)?) => {
        tracing::info_span!($name $(, $field = $value)*)
    };
}
