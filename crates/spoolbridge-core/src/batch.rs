//! Per-batch lifecycle.
//!
//! Every numbered batch walks the same path:
//!
//! ```text
//! Idle ──► Filling ──► Announced ──► Consuming ──► Deletable
//!  (producer opens)  (path sent)   (consumer opens)  (fully read)
//! ```
//!
//! A `Deletable` batch file is only removed once the consumer has read the
//! *next* announcement, never as soon as its last record is decoded.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Sequence number of a numbered batch.
pub type BatchId = u64;

/// Lifecycle state of a single batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    /// Id reserved, file not created yet.
    Idle,
    /// Producer is writing records into the file.
    Filling,
    /// File complete and its path written to the control channel.
    Announced,
    /// Consumer has the file open and is decoding records.
    Consuming,
    /// Every record was read; waiting for deferred deletion.
    Deletable,
}

impl BatchState {
    /// The only state this one may move to.
    #[must_use]
    pub fn successor(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::Filling),
            Self::Filling => Some(Self::Announced),
            Self::Announced => Some(Self::Consuming),
            Self::Consuming => Some(Self::Deletable),
            Self::Deletable => None,
        }
    }

    /// Move to `to`, rejecting anything but the single forward step.
    pub fn advance(self, batch_id: BatchId, to: Self) -> Result<Self> {
        if self.successor() == Some(to) {
            Ok(to)
        } else {
            Err(Error::InvalidTransition {
                batch_id,
                from: self,
                to,
            })
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Filling => "filling",
            Self::Announced => "announced",
            Self::Consuming => "consuming",
            Self::Deletable => "deletable",
        }
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Announced-but-unconsumed batch count seen by the producer.
///
/// `last_seen` is the id of the batch the consumer most recently opened;
/// `None` means it has not opened any batch yet and counts as `-1`.
#[must_use]
pub fn outstanding_batches(next_batch_id: BatchId, last_seen: Option<BatchId>) -> u64 {
    match last_seen {
        Some(seen) => next_batch_id.saturating_sub(seen),
        None => next_batch_id.saturating_add(1),
    }
}
