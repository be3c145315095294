//! Spool directory naming and cleanup.
//!
//! Numbered batches live at `<dir>/<prefix>_<id>`. Ad-hoc batches submitted
//! through the synchronous bridge use `<dir>/<prefix>_adhoc-<uuid>` so they
//! never collide with the numbered sequence.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::batch::BatchId;
use crate::config::SpoolConfig;
use crate::error::{Result, SpoolError};

/// Location and naming scheme of batch files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spool {
    dir: PathBuf,
    prefix: String,
}

impl Spool {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &SpoolConfig) -> Self {
        Self::new(config.dir.clone(), config.prefix.clone())
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Path of numbered batch `id`.
    #[must_use]
    pub fn batch_path(&self, id: BatchId) -> PathBuf {
        self.dir.join(format!("{}_{id}", self.prefix))
    }

    /// Fresh path for a one-off batch outside the numbered sequence.
    #[must_use]
    pub fn adhoc_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}_adhoc-{}", self.prefix, Uuid::new_v4()))
    }

    /// Recover the batch id from an announced path.
    ///
    /// Only the final `_`-separated component of the file name is parsed, so
    /// prefixes may contain underscores themselves.
    pub fn parse_batch_id(path: &Path) -> Result<BatchId> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| SpoolError::InvalidBatchName(path.display().to_string()))?;
        let (_, id) = name
            .rsplit_once('_')
            .ok_or_else(|| SpoolError::InvalidBatchName(name.to_string()))?;
        let id = id
            .parse::<BatchId>()
            .map_err(|_| SpoolError::InvalidBatchName(name.to_string()))?;
        Ok(id)
    }
}

/// Delete a spool file, tolerating one that is already gone.
///
/// Returns `true` when a file was actually removed.
pub fn remove_quietly(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed spool file");
            true
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => false,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Failed to remove spool file");
            false
        }
    }
}

/// Removes its spool file when dropped.
#[derive(Debug)]
pub struct SpoolFileGuard {
    path: PathBuf,
}

impl SpoolFileGuard {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SpoolFileGuard {
    fn drop(&mut self) {
        remove_quietly(&self.path);
    }
}
