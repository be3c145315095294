//! Error types for spoolbridge-core

use std::fmt::Write;
use std::path::PathBuf;

use thiserror::Error;

use crate::batch::{BatchId, BatchState};

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
    /// Optional platform hint (e.g., "macOS", "Linux")
    pub platform: Option<String>,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a command without a platform hint
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
            platform: None,
        });
        self
    }

    /// Add a command with a platform hint
    #[must_use]
    pub fn platform_command(
        mut self,
        label: impl Into<String>,
        command: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
            platform: Some(platform.into()),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let label = cmd.platform.as_ref().map_or_else(
                    || cmd.label.clone(),
                    |platform| format!("{} ({platform})", cmd.label),
                );
                let _ = writeln!(output, "    - {label}: {}", cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for spoolbridge-core
#[derive(Error, Debug)]
pub enum Error {
    /// A control pipe or the first batch file could not be opened
    #[error("failed to open {what} at {}: {source}", path.display())]
    Initialization {
        what: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    /// The worker produced no result within the poll budget
    #[error("batch {} not processed after {attempts} attempts", input.display())]
    BatchProcessingTimeout { attempts: u32, input: PathBuf },

    /// The result batch does not hold one record per submitted record
    #[error("input size and output size do not match: submitted {expected}, received {actual}")]
    BatchSizeMismatch { expected: usize, actual: usize },

    /// The background worker run did not complete within the join bound
    #[error("worker did not finish within {timeout_ms} ms")]
    WorkerJoinTimeout { timeout_ms: u64 },

    /// Batch file framing errors
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// Spool naming errors
    #[error("Spool error: {0}")]
    Spool(#[from] SpoolError),

    /// Illegal batch lifecycle step
    #[error("batch {batch_id} cannot move from {from} to {to}")]
    InvalidTransition {
        batch_id: BatchId,
        from: BatchState,
        to: BatchState,
    },

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// The bridge was stopped
    #[error("bridge is shut down")]
    Shutdown,

    /// The consumer went away while the producer waited on its progress
    #[error("consumer progress channel closed")]
    ControlChannelClosed,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Initialization { path, .. } => Some(
                Remediation::new(format!(
                    "Verify {} exists and is accessible to this process.",
                    path.display()
                ))
                .command("Inspect path", format!("ls -l \"{}\"", path.display()))
                .platform_command("Check tmpfs", "df -h /dev/shm", "Linux")
                .alternative("Start the worker first so it creates its control pipes."),
            ),
            Self::BatchProcessingTimeout { input, .. } => Some(
                Remediation::new("The worker did not pick up the batch in time. Retry the call.")
                    .command("Check spool", format!("ls -l \"{}\"", input.display()))
                    .alternative("Raise sync.retry_attempts or sync.retry_delay_ms."),
            ),
            Self::BatchSizeMismatch { .. } => Some(
                Remediation::new(
                    "The worker returned a different number of records. This is a worker bug.",
                )
                .command("Worker logs", "journalctl --user -e")
                .alternative("Check that the worker emits exactly one result per input record."),
            ),
            Self::WorkerJoinTimeout { .. } => Some(
                Remediation::new("The worker kept running after stop was requested.")
                    .command("Find worker", "ps -ef | grep -i worker")
                    .alternative("Raise shutdown.join_timeout_ms."),
            ),
            Self::Framing(err) => Some(err.remediation()),
            Self::Spool(err) => Some(err.remediation()),
            Self::InvalidTransition { .. } => Some(
                Remediation::new("Producer and consumer disagree on batch order.")
                    .command("Check spool", "ls -l /dev/shm")
                    .alternative("Restart both sides of the bridge with an empty spool."),
            ),
            Self::Config(err) => Some(err.remediation()),
            Self::Shutdown => Some(
                Remediation::new("The bridge was stopped. Create a new bridge to continue.")
                    .command("Check spool", "ls -l /dev/shm")
                    .alternative("Avoid calling enqueue/next after stop()."),
            ),
            Self::ControlChannelClosed => Some(
                Remediation::new("The consumer was dropped while the producer was throttled.")
                    .command("Check spool", "ls -l /dev/shm")
                    .alternative("Keep the consumer alive until the producer has flushed."),
            ),
            Self::Io(_) => Some(
                Remediation::new("Check spool permissions and free space, then retry.")
                    .platform_command("Check tmpfs", "df -h /dev/shm", "Linux")
                    .alternative("Point spool.dir at a writable directory."),
            ),
        }
    }

    /// Whether the caller may retry the whole operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BatchProcessingTimeout { .. } | Self::Io(_))
    }
}

/// Batch file framing errors
#[derive(Error, Debug)]
pub enum FramingError {
    #[error("record length prefix cut off at end of batch")]
    TruncatedLength,

    #[error("record declares {declared} payload bytes but batch ends after {available}")]
    TruncatedRecord { declared: u64, available: u64 },

    #[error("record length prefix overflows u64")]
    LengthOverflow,

    #[error("record length {len} exceeds limit {max}")]
    RecordTooLarge { len: u64, max: u64 },
}

impl FramingError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::TruncatedLength | Self::TruncatedRecord { .. } => Remediation::new(
                "A batch file ended mid-record. It was read before the writer finished it.",
            )
            .command("Check spool", "ls -l /dev/shm")
            .alternative("Only announce batch files after they are fully written."),
            Self::LengthOverflow | Self::RecordTooLarge { .. } => {
                Remediation::new("A batch file holds a corrupt length prefix.")
                    .command("Dump header", "xxd -l 32 <batch-file>")
                    .alternative("Check that both sides use varint length-delimited records.")
            }
        }
    }
}

/// Spool naming errors
#[derive(Error, Debug)]
pub enum SpoolError {
    #[error("batch file name {0} carries no numeric batch id")]
    InvalidBatchName(String),

    #[error("spool path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),
}

impl SpoolError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::InvalidBatchName(name) => Remediation::new(format!(
                "The worker announced {name}; expected <prefix>_<id>."
            ))
            .command("Check spool", "ls -l /dev/shm")
            .alternative("Make the worker name result files <prefix>_<batch id>."),
            Self::NonUtf8Path(_) => Remediation::new("Use a UTF-8 spool directory and prefix.")
                .command("Show config", "cat spoolbridge.toml")
                .alternative("Set spool.dir to an ASCII path such as /dev/shm."),
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => Remediation::new(format!(
                "Config file not found: {path}. Verify the path and retry."
            ))
            .command("Check path", format!("ls -l \"{path}\""))
            .alternative("Omit the config file to run with defaults."),
            Self::ReadFailed(path, _) => Remediation::new(format!(
                "Failed to read config file: {path}. Check permissions."
            ))
            .command("Check permissions", format!("ls -l \"{path}\""))
            .alternative("Ensure the file is readable by the current user."),
            Self::ParseFailed(_) => Remediation::new("Config parse failed. Fix the TOML syntax.")
                .command("Show config", "cat spoolbridge.toml")
                .alternative("Compare against the documented [stream]/[spool]/[sync] tables."),
            Self::ValidationError(_) => {
                Remediation::new("Config validation failed. Fix the invalid fields and retry.")
                    .command("Show config", "cat spoolbridge.toml")
                    .alternative("Sizes, limits and attempts must all be at least 1.")
            }
        }
    }
}

/// Format an error with remediation guidance for display.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}
