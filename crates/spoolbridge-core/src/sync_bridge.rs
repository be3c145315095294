//! Synchronous request/response over a single ad-hoc batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{Instrument, debug, field, warn};

use crate::error::{Error, Result};
use crate::framer::{Record, read_batch_file, write_batch_file};
use crate::retry::{RetryPolicy, poll_until_ready};
use crate::spool::{Spool, SpoolFileGuard};
use crate::worker::Worker;

/// Submits one batch at a time and waits for the worker's answer.
#[derive(Debug)]
pub struct BatchProcessor<W> {
    worker: Arc<W>,
    spool: Spool,
    policy: RetryPolicy,
}

impl<W: Worker> BatchProcessor<W> {
    #[must_use]
    pub fn new(worker: Arc<W>, spool: Spool, policy: RetryPolicy) -> Self {
        Self {
            worker,
            spool,
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Write `records` to a fresh ad-hoc file, poll the worker for its
    /// result, and return the decoded result records.
    ///
    /// The worker is polled with the same input path until it answers or
    /// the attempt budget is spent. Both files are removed before returning,
    /// whatever the outcome.
    pub async fn process_batch<I>(&self, records: I) -> Result<Vec<Record>>
    where
        I: IntoIterator<Item = Record>,
    {
        let input = SpoolFileGuard::new(self.spool.adhoc_path());
        let span = crate::bridge_span!(
            "process_batch",
            path = field::display(input.path().display()),
        );
        self.submit_and_wait(&input, records).instrument(span).await
    }

    async fn submit_and_wait<I>(&self, input: &SpoolFileGuard, records: I) -> Result<Vec<Record>>
    where
        I: IntoIterator<Item = Record>,
    {
        let expected = write_batch_file(input.path(), records)?;
        debug!(records = expected, "Submitted ad-hoc batch");

        let input_path = input.path();
        let outcome = poll_until_ready(&self.policy, || self.poll_worker(input_path)).await;

        let Some(result_path) = outcome.result else {
            return Err(Error::BatchProcessingTimeout {
                attempts: outcome.attempts,
                input: input_path.to_path_buf(),
            });
        };
        let result = SpoolFileGuard::new(result_path);

        let decoded = read_batch_file(result.path())?;
        if decoded.len() != expected {
            warn!(
                expected,
                actual = decoded.len(),
                result = %result.path().display(),
                "Worker returned wrong record count"
            );
            return Err(Error::BatchSizeMismatch {
                expected,
                actual: decoded.len(),
            });
        }

        debug!(
            records = decoded.len(),
            attempts = outcome.attempts,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Ad-hoc batch processed"
        );
        Ok(decoded)
    }

    /// One `process_one_batch` call on the blocking pool. A poll that panics
    /// counts as "not ready".
    async fn poll_worker(&self, input: &Path) -> Option<PathBuf> {
        let worker = Arc::clone(&self.worker);
        let input = input.to_path_buf();
        match tokio::task::spawn_blocking(move || worker.process_one_batch(&input)).await {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "Worker poll did not complete");
                None
            }
        }
    }
}
