//! Streaming producer: records in, announced batch files out.
//!
//! Records are appended to the open batch file. Once it holds `batch_size`
//! records the file is finished, its path is announced on the control
//! channel, and the next file is opened as soon as the consumer is close
//! enough behind (at most `throttle_limit` batches outstanding).

use std::path::Path;

use serde::Serialize;
use tokio::io::AsyncWrite;
use tracing::{debug, warn};

use crate::batch::{BatchId, BatchState};
use crate::config::StreamConfig;
use crate::control::ControlSender;
use crate::error::{Error, Result};
use crate::framer::{BatchWriter, Record};
use crate::progress::{ProgressWatcher, ShutdownSignal};
use crate::spool::{Spool, remove_quietly};

/// Producer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProducerStats {
    pub records_enqueued: u64,
    pub batches_announced: u64,
    pub next_batch_id: BatchId,
    pub throttle_waits: u64,
}

#[derive(Debug)]
struct FillingBatch {
    id: BatchId,
    writer: BatchWriter,
    state: BatchState,
}

/// Writes records into numbered batch files and announces each one.
#[derive(Debug)]
pub struct StreamProducer<W> {
    spool: Spool,
    batch_size: usize,
    throttle_limit: u64,
    control: ControlSender<W>,
    progress: ProgressWatcher,
    shutdown: ShutdownSignal,
    next_batch_id: BatchId,
    current: Option<FillingBatch>,
    stats: ProducerStats,
}

impl<W: AsyncWrite + Unpin> StreamProducer<W> {
    #[must_use]
    pub fn new(
        spool: Spool,
        config: &StreamConfig,
        control: ControlSender<W>,
        progress: ProgressWatcher,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            spool,
            batch_size: config.batch_size.max(1),
            throttle_limit: config.throttle_limit,
            control,
            progress,
            shutdown,
            next_batch_id: 0,
            current: None,
            stats: ProducerStats::default(),
        }
    }

    /// Append one record, announcing the batch when it is full.
    ///
    /// Blocks while too many batches are outstanding; returns
    /// [`Error::Shutdown`] if the bridge stops during that wait.
    pub async fn enqueue(&mut self, record: &Record) -> Result<()> {
        let mut batch = match self.current.take() {
            Some(batch) => batch,
            None => self.open_batch().await?,
        };

        if let Err(err) = batch.writer.write(record) {
            self.current = Some(batch);
            return Err(err);
        }
        self.stats.records_enqueued += 1;

        if batch.writer.records() < self.batch_size {
            self.current = Some(batch);
            return Ok(());
        }

        self.announce(batch).await?;
        let next = self.open_batch().await?;
        self.current = Some(next);
        Ok(())
    }

    /// Announce the open batch even if it is not full.
    ///
    /// An empty batch stays open and unannounced.
    pub async fn flush(&mut self) -> Result<()> {
        match self.current.take() {
            Some(batch) if batch.writer.records() > 0 => {
                self.announce(batch).await?;
                self.throttle().await
            }
            other => {
                self.current = other;
                Ok(())
            }
        }
    }

    /// Drop the control handle, removing an unannounced batch file.
    pub fn close(mut self) {
        self.discard_current();
        debug!(
            next_batch_id = self.next_batch_id,
            announced = self.control.announced(),
            "Producer closed"
        );
    }

    #[must_use]
    pub fn stats(&self) -> ProducerStats {
        self.stats
    }

    /// Id the next announced batch will carry.
    #[must_use]
    pub fn next_batch_id(&self) -> BatchId {
        self.next_batch_id
    }

    /// Path of the batch currently being filled.
    #[must_use]
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|batch| batch.writer.path())
    }

    async fn open_batch(&mut self) -> Result<FillingBatch> {
        self.throttle().await?;

        let id = self.next_batch_id;
        let path = self.spool.batch_path(id);
        let writer = match BatchWriter::create(&path) {
            Ok(writer) => writer,
            Err(source) if id == 0 => {
                return Err(Error::Initialization {
                    what: "batch file",
                    path,
                    source,
                });
            }
            Err(err) => return Err(err.into()),
        };
        let state = BatchState::Idle.advance(id, BatchState::Filling)?;
        debug!(batch_id = id, path = %path.display(), "Opened batch for filling");
        Ok(FillingBatch { id, writer, state })
    }

    async fn announce(&mut self, batch: FillingBatch) -> Result<()> {
        let FillingBatch { id, writer, state } = batch;
        let records = writer.records();
        let state = state.advance(id, BatchState::Announced)?;
        let path = writer.finish()?;

        let sent = tokio::select! {
            biased;
            () = self.shutdown.triggered() => Err(Error::Shutdown),
            res = self.control.announce(&path) => res,
        };
        if let Err(err) = sent {
            remove_quietly(&path);
            return Err(err);
        }

        self.next_batch_id += 1;
        self.stats.batches_announced += 1;
        self.stats.next_batch_id = self.next_batch_id;
        debug!(
            batch_id = id,
            records,
            state = %state,
            path = %path.display(),
            "Announced batch"
        );
        Ok(())
    }

    async fn throttle(&mut self) -> Result<()> {
        let next = self.next_batch_id;
        let outstanding = self.progress.outstanding(next);
        if outstanding <= self.throttle_limit {
            return Ok(());
        }

        self.stats.throttle_waits += 1;
        debug!(
            batch_id = next,
            outstanding,
            limit = self.throttle_limit,
            "Waiting for consumer"
        );
        tokio::select! {
            biased;
            () = self.shutdown.triggered() => Err(Error::Shutdown),
            res = self.progress.wait_within(next, self.throttle_limit) => res,
        }
    }

    fn discard_current(&mut self) {
        if let Some(batch) = self.current.take() {
            let records = batch.writer.records();
            let path = batch.writer.path().to_path_buf();
            drop(batch);
            if remove_quietly(&path) && records > 0 {
                warn!(
                    batch_id = self.next_batch_id,
                    records,
                    path = %path.display(),
                    "Discarded unannounced batch"
                );
            }
        }
    }
}

impl<W> Drop for StreamProducer<W> {
    fn drop(&mut self) {
        if let Some(batch) = self.current.take() {
            let path = batch.writer.path().to_path_buf();
            drop(batch);
            remove_quietly(&path);
        }
    }
}
