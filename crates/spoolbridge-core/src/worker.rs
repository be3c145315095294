//! Contract with the external worker process.
//!
//! The bridge does not know what the worker computes or how it is launched.
//! It only needs the control pipe locations, blocking entry points to start
//! and run it, a way to ask for the result of one ad-hoc batch, and a stop
//! request.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{Error, Result};

/// Status reported when no worker run finished (or none was started).
pub const WORKER_STATUS_UNSET: i32 = -1;

/// Status recorded for a worker run that panicked.
pub const WORKER_STATUS_PANICKED: i32 = 1;

/// Configuration files the worker is started with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPaths {
    pub weights: PathBuf,
    pub definition: PathBuf,
}

impl WorkerPaths {
    #[must_use]
    pub fn new(weights: impl Into<PathBuf>, definition: impl Into<PathBuf>) -> Self {
        Self {
            weights: weights.into(),
            definition: definition.into(),
        }
    }
}

/// The external worker.
///
/// Every method may block; the bridge calls `start` and `run` on the blocking
/// thread pool.
pub trait Worker: Send + Sync + 'static {
    /// FIFO the host writes batch announcements to.
    fn input_pipe_path(&self) -> PathBuf;

    /// FIFO the worker writes result announcements to.
    fn output_pipe_path(&self) -> PathBuf;

    /// One-shot start; returns the worker's exit status.
    fn start(&self, paths: &WorkerPaths) -> i32;

    /// Main loop; returns the worker's exit status once stopped.
    fn run(&self, paths: &WorkerPaths) -> i32;

    /// Result file for the ad-hoc batch at `input`, or `None` while it is not
    /// ready. Called repeatedly with the same input.
    fn process_one_batch(&self, input: &Path) -> Option<PathBuf>;

    /// Ask `run` to return.
    fn stop(&self);
}

/// Background `run` of a worker.
#[derive(Debug)]
pub struct WorkerRun {
    handle: JoinHandle<i32>,
    status: Arc<AtomicI32>,
}

impl WorkerRun {
    /// Run `worker` on the blocking pool, recording its status in `status`
    /// when it returns.
    pub fn spawn<W: Worker>(worker: Arc<W>, paths: WorkerPaths, status: Arc<AtomicI32>) -> Self {
        let recorded = Arc::clone(&status);
        let blocking = tokio::task::spawn_blocking(move || worker.run(&paths));
        let handle = tokio::spawn(async move {
            let code = match blocking.await {
                Ok(code) => code,
                Err(err) if err.is_panic() => {
                    error!("Worker run panicked");
                    WORKER_STATUS_PANICKED
                }
                Err(err) => {
                    warn!(error = %err, "Worker run was cancelled");
                    WORKER_STATUS_UNSET
                }
            };
            recorded.store(code, Ordering::SeqCst);
            info!(status = code, "Worker run finished");
            code
        });
        Self { handle, status }
    }

    /// Status so far; [`WORKER_STATUS_UNSET`] while still running.
    #[must_use]
    pub fn status(&self) -> i32 {
        self.status.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait up to `timeout` for the run to return.
    pub async fn join(self, timeout: Duration) -> Result<i32> {
        match tokio::time::timeout(timeout, self.handle).await {
            Ok(Ok(code)) => Ok(code),
            Ok(Err(err)) => {
                warn!(error = %err, "Failed to join worker run");
                Ok(WORKER_STATUS_UNSET)
            }
            Err(_) => Err(Error::WorkerJoinTimeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32};

    /// What the fake worker answers to `process_one_batch`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum Reply {
        /// Echo every record after `ready_after` "not ready" answers.
        Echo { ready_after: u32 },
        /// Echo all records but the last.
        DropLast,
        /// Never produce a result.
        Never,
    }

    /// In-process worker used by unit tests.
    #[derive(Debug)]
    pub(crate) struct FakeWorker {
        pub(crate) dir: PathBuf,
        pub(crate) reply: Reply,
        pub(crate) run_status: i32,
        pub(crate) panic_in_run: bool,
        /// How long `run` keeps going after `stop`.
        pub(crate) linger: Duration,
        /// How long each `process_one_batch` call blocks.
        pub(crate) poll_delay: Duration,
        pub(crate) polls: AtomicU32,
        pub(crate) stopped: AtomicBool,
        pub(crate) results: Mutex<Vec<PathBuf>>,
    }

    impl FakeWorker {
        pub(crate) fn new(dir: &Path, reply: Reply) -> Self {
            Self {
                dir: dir.to_path_buf(),
                reply,
                run_status: 0,
                panic_in_run: false,
                linger: Duration::ZERO,
                poll_delay: Duration::ZERO,
                polls: AtomicU32::new(0),
                stopped: AtomicBool::new(false),
                results: Mutex::new(Vec::new()),
            }
        }

        fn write_result(&self, input: &Path, drop_last: bool) -> PathBuf {
            let mut records = crate::framer::read_batch_file(input).unwrap();
            if drop_last {
                records.pop();
            }
            let name = format!(
                "{}.out",
                input.file_name().unwrap().to_string_lossy()
            );
            let out = self.dir.join(name);
            crate::framer::write_batch_file(&out, records).unwrap();
            self.results.lock().unwrap().push(out.clone());
            out
        }
    }

    impl Worker for FakeWorker {
        fn input_pipe_path(&self) -> PathBuf {
            self.dir.join("in.fifo")
        }

        fn output_pipe_path(&self) -> PathBuf {
            self.dir.join("out.fifo")
        }

        fn start(&self, _paths: &WorkerPaths) -> i32 {
            self.run_status
        }

        fn run(&self, _paths: &WorkerPaths) -> i32 {
            assert!(!self.panic_in_run, "worker crashed");
            while !self.stopped.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
            std::thread::sleep(self.linger);
            self.run_status
        }

        fn process_one_batch(&self, input: &Path) -> Option<PathBuf> {
            if !self.poll_delay.is_zero() {
                std::thread::sleep(self.poll_delay);
            }
            let polls = self.polls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Reply::Echo { ready_after } if polls >= ready_after => {
                    Some(self.write_result(input, false))
                }
                Reply::Echo { .. } | Reply::Never => None,
                Reply::DropLast => Some(self.write_result(input, true)),
            }
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }
}
