//! Streaming consumer: announced batch files in, records out.
//!
//! The consumer reads one path per control line, decodes that batch file to
//! its end, then moves on to the next announcement. A fully read file is only
//! deleted right before the following announcement is read, so the file the
//! caller is working from never disappears underneath it.

use std::path::PathBuf;

use serde::Serialize;
use tokio::io::AsyncBufRead;
use tracing::{debug, warn};

use crate::batch::{BatchId, BatchState};
use crate::control::ControlReceiver;
use crate::error::{Error, Result};
use crate::framer::{BatchReader, Record};
use crate::progress::{ProgressPublisher, ShutdownSignal};
use crate::spool::{Spool, remove_quietly};

/// Consumer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub records_read: u64,
    pub batches_consumed: u64,
    pub last_batch_seen: Option<BatchId>,
    pub files_deleted: u64,
}

#[derive(Debug)]
struct ConsumingBatch {
    id: BatchId,
    reader: BatchReader,
    state: BatchState,
}

/// Yields records from announced batch files in announcement order.
#[derive(Debug)]
pub struct StreamConsumer<R> {
    control: ControlReceiver<R>,
    progress: ProgressPublisher,
    shutdown: ShutdownSignal,
    current: Option<ConsumingBatch>,
    pending_delete: Option<PathBuf>,
    stats: ConsumerStats,
}

impl<R: AsyncBufRead + Unpin> StreamConsumer<R> {
    #[must_use]
    pub fn new(
        control: ControlReceiver<R>,
        progress: ProgressPublisher,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            control,
            progress,
            shutdown,
            current: None,
            pending_delete: None,
            stats: ConsumerStats::default(),
        }
    }

    /// Next record, or `None` once the control channel is closed.
    ///
    /// Crosses batch boundaries without returning to the caller and blocks
    /// while the channel is open but nothing is announced.
    pub async fn next(&mut self) -> Result<Option<Record>> {
        loop {
            let mut batch = match self.current.take() {
                Some(batch) => batch,
                None => match self.open_next().await? {
                    Some(batch) => batch,
                    None => return Ok(None),
                },
            };

            match batch.reader.next_record() {
                Ok(Some(record)) => {
                    self.current = Some(batch);
                    self.stats.records_read += 1;
                    return Ok(Some(record));
                }
                Ok(None) => self.finish_batch(batch)?,
                Err(err) => {
                    // The batch is abandoned on disk; the stream resumes with
                    // the next announcement.
                    warn!(
                        batch_id = batch.id,
                        path = %batch.reader.path().display(),
                        error = %err,
                        "Failed to decode batch"
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Drop the control handle and delete every fully read batch.
    ///
    /// The open batch is deleted too when all of its records were returned;
    /// a partially read one stays on disk.
    pub fn close(mut self) {
        self.delete_pending();
        if let Some(mut batch) = self.current.take() {
            if batch.reader.at_end().unwrap_or(false) && self.finish_batch(batch).is_ok() {
                self.delete_pending();
            }
        }
        debug!(
            last_batch_seen = ?self.stats.last_batch_seen,
            "Consumer closed"
        );
    }

    #[must_use]
    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    async fn open_next(&mut self) -> Result<Option<ConsumingBatch>> {
        let announced = tokio::select! {
            biased;
            () = self.shutdown.triggered() => return Err(Error::Shutdown),
            res = self.control.next_path() => res?,
        };
        let Some(path) = announced else {
            debug!("Control channel closed by peer");
            return Ok(None);
        };
        self.delete_pending();

        let id = Spool::parse_batch_id(&path)?;
        let reader = BatchReader::open(&path)?;
        let state = BatchState::Announced.advance(id, BatchState::Consuming)?;

        self.stats.last_batch_seen = Some(id);
        self.progress.publish(id);
        debug!(batch_id = id, path = %path.display(), "Opened batch for reading");
        Ok(Some(ConsumingBatch { id, reader, state }))
    }

    fn finish_batch(&mut self, batch: ConsumingBatch) -> Result<()> {
        let ConsumingBatch { id, reader, state } = batch;
        state.advance(id, BatchState::Deletable)?;
        let records = reader.records_read();
        let path = reader.path().to_path_buf();
        drop(reader);

        self.stats.batches_consumed += 1;
        debug!(batch_id = id, records, "Batch fully read");
        self.pending_delete = Some(path);
        Ok(())
    }

    fn delete_pending(&mut self) {
        if let Some(path) = self.pending_delete.take() {
            if remove_quietly(&path) {
                self.stats.files_deleted += 1;
            }
        }
    }
}

impl<R> Drop for StreamConsumer<R> {
    fn drop(&mut self) {
        if let Some(path) = self.pending_delete.take() {
            remove_quietly(&path);
        }
    }
}
