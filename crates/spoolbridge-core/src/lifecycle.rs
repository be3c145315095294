//! Bridge lifecycle: lazy pipe setup, worker start, and orderly stop.
//!
//! [`Bridge`] owns every piece of the host side. Nothing is opened on
//! construction. The host→worker pipe and its producer are created on the
//! first `enqueue`/`flush`, the worker→host pipe and its consumer on the first
//! `next`, each exactly once. `stop` winds everything down and leaves the
//! bridge permanently shut.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use serde::Serialize;
use tokio::io::BufReader;
use tokio::net::unix::pipe;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::consumer::{ConsumerStats, StreamConsumer};
use crate::control::{ControlReceiver, ControlSender, open_fifo_receiver, open_fifo_sender};
use crate::error::{Error, Result};
use crate::framer::Record;
use crate::producer::{ProducerStats, StreamProducer};
use crate::progress::{ProgressPublisher, ShutdownTrigger};
use crate::retry::RetryPolicy;
use crate::spool::Spool;
use crate::sync_bridge::BatchProcessor;
use crate::worker::{WORKER_STATUS_PANICKED, WORKER_STATUS_UNSET, Worker, WorkerPaths, WorkerRun};

type FifoProducer = StreamProducer<pipe::Sender>;
type FifoConsumer = StreamConsumer<BufReader<pipe::Receiver>>;

/// Snapshot of both streaming directions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    /// `None` until the first `enqueue`/`flush`.
    pub producer: Option<ProducerStats>,
    /// `None` until the first `next`.
    pub consumer: Option<ConsumerStats>,
    pub worker_status: i32,
}

/// Host side of the bridge.
pub struct Bridge<W: Worker> {
    config: BridgeConfig,
    worker: Arc<W>,
    spool: Spool,
    sync: BatchProcessor<W>,
    progress: ProgressPublisher,
    shutdown: ShutdownTrigger,
    producer: Mutex<Option<FifoProducer>>,
    consumer: Mutex<Option<FifoConsumer>>,
    run: Mutex<Option<WorkerRun>>,
    status: Arc<AtomicI32>,
}

impl<W: Worker> std::fmt::Debug for Bridge<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("spool", &self.spool)
            .field("shutdown", &self.shutdown.is_triggered())
            .field("worker_status", &self.worker_status())
            .finish_non_exhaustive()
    }
}

impl<W: Worker> Bridge<W> {
    /// Validate `config` and prepare the bridge. Opens nothing.
    pub fn new(config: BridgeConfig, worker: W) -> Result<Self> {
        config.validate()?;
        let worker = Arc::new(worker);
        let spool = Spool::from_config(&config.spool);
        let sync = BatchProcessor::new(
            Arc::clone(&worker),
            spool.clone(),
            RetryPolicy::from_sync_config(&config.sync),
        );
        debug!(
            spool_dir = %spool.dir().display(),
            prefix = spool.prefix(),
            batch_size = config.stream.batch_size,
            throttle_limit = config.stream.throttle_limit,
            "Bridge created"
        );
        Ok(Self {
            config,
            worker,
            spool,
            sync,
            progress: ProgressPublisher::new(),
            shutdown: ShutdownTrigger::new(),
            producer: Mutex::new(None),
            consumer: Mutex::new(None),
            run: Mutex::new(None),
            status: Arc::new(AtomicI32::new(WORKER_STATUS_UNSET)),
        })
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    #[must_use]
    pub fn worker(&self) -> &W {
        &self.worker
    }

    #[must_use]
    pub fn spool(&self) -> &Spool {
        &self.spool
    }

    /// Run the worker's one-shot start on the blocking pool.
    pub async fn start(&self, paths: &WorkerPaths) -> i32 {
        let worker = Arc::clone(&self.worker);
        let paths = paths.clone();
        info!(
            weights = %paths.weights.display(),
            definition = %paths.definition.display(),
            "Starting worker"
        );
        let status = match tokio::task::spawn_blocking(move || worker.start(&paths)).await {
            Ok(code) => code,
            Err(err) if err.is_panic() => WORKER_STATUS_PANICKED,
            Err(err) => {
                warn!(error = %err, "Worker start was cancelled");
                WORKER_STATUS_UNSET
            }
        };
        self.status.store(status, Ordering::SeqCst);
        info!(status, "Worker start returned");
        status
    }

    /// Run the worker's main loop in the background.
    ///
    /// A second call while a run is in flight is ignored.
    pub async fn start_async(&self, paths: &WorkerPaths) -> Result<()> {
        self.ensure_running()?;
        let mut run = self.run.lock().await;
        if run.as_ref().is_some_and(|run| !run.is_finished()) {
            warn!("Worker already running in the background");
            return Ok(());
        }
        self.status.store(WORKER_STATUS_UNSET, Ordering::SeqCst);
        *run = Some(WorkerRun::spawn(
            Arc::clone(&self.worker),
            paths.clone(),
            Arc::clone(&self.status),
        ));
        info!("Worker running in the background");
        Ok(())
    }

    /// Latest worker status; [`WORKER_STATUS_UNSET`] while nothing finished.
    #[must_use]
    pub fn worker_status(&self) -> i32 {
        self.status.load(Ordering::SeqCst)
    }

    /// Append a record to the host→worker stream.
    pub async fn enqueue(&self, record: &Record) -> Result<()> {
        let mut slot = self.producer.lock().await;
        self.producer_slot(&mut slot)?.enqueue(record).await
    }

    /// Announce the partially filled batch, if any.
    pub async fn flush(&self) -> Result<()> {
        let mut slot = self.producer.lock().await;
        self.producer_slot(&mut slot)?.flush().await
    }

    /// Next record of the worker→host stream; `None` once the worker closed
    /// its end.
    pub async fn next(&self) -> Result<Option<Record>> {
        let mut slot = self.consumer.lock().await;
        self.consumer_slot(&mut slot)?.next().await
    }

    /// Submit one ad-hoc batch and wait for its result.
    pub async fn process_batch<I>(&self, records: I) -> Result<Vec<Record>>
    where
        I: IntoIterator<Item = Record>,
    {
        self.ensure_running()?;
        self.sync.process_batch(records).await
    }

    /// Stop the worker and close both control pipes.
    ///
    /// Returns the background run's status, [`WORKER_STATUS_UNSET`] when no
    /// run was started or it could not be joined, or
    /// [`Error::WorkerJoinTimeout`] when it outlived the join bound. The pipes
    /// are closed in every case.
    pub async fn stop(&self) -> Result<i32> {
        info!("Stopping bridge");
        self.shutdown.trigger();
        self.worker.stop();

        tokio::time::sleep(self.config.shutdown.drain_delay()).await;

        let run = self.run.lock().await.take();
        let joined = match run {
            Some(run) => run.join(self.config.shutdown.join_timeout()).await,
            None => Ok(WORKER_STATUS_UNSET),
        };

        info!("closing control pipes");
        if let Some(producer) = self.producer.lock().await.take() {
            producer.close();
        }
        if let Some(consumer) = self.consumer.lock().await.take() {
            consumer.close();
        }

        match &joined {
            Ok(status) => info!(status, "Bridge stopped"),
            Err(err) => warn!(error = %err, "Bridge stopped without joining worker"),
        }
        joined
    }

    /// Counters of both directions. Waits for in-flight `enqueue`/`next`.
    pub async fn stats(&self) -> BridgeStats {
        let producer = self.producer.lock().await.as_ref().map(StreamProducer::stats);
        let consumer = self.consumer.lock().await.as_ref().map(StreamConsumer::stats);
        BridgeStats {
            producer,
            consumer,
            worker_status: self.worker_status(),
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutdown.is_triggered() {
            Err(Error::Shutdown)
        } else {
            Ok(())
        }
    }

    fn producer_slot<'a>(&self, slot: &'a mut Option<FifoProducer>) -> Result<&'a mut FifoProducer> {
        self.ensure_running()?;
        if slot.is_none() {
            let path = self.worker.input_pipe_path();
            let sender = open_fifo_sender(&path)?;
            info!(path = %path.display(), "Opened input control pipe");
            *slot = Some(StreamProducer::new(
                self.spool.clone(),
                &self.config.stream,
                ControlSender::new(sender),
                self.progress.subscribe(),
                self.shutdown.signal(),
            ));
        }
        slot.as_mut().ok_or(Error::Shutdown)
    }

    fn consumer_slot<'a>(&self, slot: &'a mut Option<FifoConsumer>) -> Result<&'a mut FifoConsumer> {
        self.ensure_running()?;
        if slot.is_none() {
            let path = self.worker.output_pipe_path();
            let receiver = open_fifo_receiver(&path)?;
            info!(path = %path.display(), "Opened output control pipe");
            *slot = Some(StreamConsumer::new(
                ControlReceiver::new(BufReader::new(receiver)),
                self.progress.clone(),
                self.shutdown.signal(),
            ));
        }
        slot.as_mut().ok_or(Error::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::testing::{FakeWorker, Reply};
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.spool.dir = dir.path().to_path_buf();
        config.spool.prefix = "in".to_string();
        config.sync.retry_delay_ms = 10;
        config.shutdown.drain_delay_ms = 10;
        config.shutdown.join_timeout_ms = 2000;
        config
    }

    fn paths() -> WorkerPaths {
        WorkerPaths::new("/models/weights.bin", "/models/net.prototxt")
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.stream.batch_size = 0;
        let err = Bridge::new(config, FakeWorker::new(dir.path(), Reply::Never)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn start_returns_worker_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut fake = FakeWorker::new(dir.path(), Reply::Never);
        fake.run_status = 3;
        let bridge = Bridge::new(config(&dir), fake).unwrap();
        assert_eq!(bridge.worker_status(), WORKER_STATUS_UNSET);
        assert_eq!(bridge.start(&paths()).await, 3);
        assert_eq!(bridge.worker_status(), 3);
    }

    #[tokio::test]
    async fn stop_without_background_run_is_unset() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Bridge::new(config(&dir), FakeWorker::new(dir.path(), Reply::Never)).unwrap();
        assert_eq!(bridge.stop().await.unwrap(), WORKER_STATUS_UNSET);
        assert!(bridge.worker().stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stop_joins_background_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut fake = FakeWorker::new(dir.path(), Reply::Never);
        fake.run_status = 0;
        let bridge = Bridge::new(config(&dir), fake).unwrap();
        bridge.start_async(&paths()).await.unwrap();
        bridge.start_async(&paths()).await.unwrap();
        assert_eq!(bridge.stop().await.unwrap(), 0);
        assert_eq!(bridge.worker_status(), 0);
    }

    #[tokio::test]
    async fn panicking_background_run_reports_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut fake = FakeWorker::new(dir.path(), Reply::Never);
        fake.panic_in_run = true;
        let bridge = Bridge::new(config(&dir), fake).unwrap();
        bridge.start_async(&paths()).await.unwrap();
        assert_eq!(bridge.stop().await.unwrap(), WORKER_STATUS_PANICKED);
    }

    #[tokio::test]
    async fn stuck_worker_is_join_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut fake = FakeWorker::new(dir.path(), Reply::Never);
        fake.linger = Duration::from_millis(500);
        let mut config = config(&dir);
        config.shutdown.join_timeout_ms = 50;
        let bridge = Bridge::new(config, fake).unwrap();
        bridge.start_async(&paths()).await.unwrap();
        let err = bridge.stop().await.unwrap_err();
        assert!(matches!(err, Error::WorkerJoinTimeout { timeout_ms: 50 }));
    }

    #[tokio::test]
    async fn calls_after_stop_are_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Bridge::new(
            config(&dir),
            FakeWorker::new(dir.path(), Reply::Echo { ready_after: 0 }),
        )
        .unwrap();
        bridge.stop().await.unwrap();

        assert!(matches!(
            bridge.enqueue(&Record::from(&b"x"[..])).await,
            Err(Error::Shutdown)
        ));
        assert!(matches!(bridge.flush().await, Err(Error::Shutdown)));
        assert!(matches!(bridge.next().await, Err(Error::Shutdown)));
        assert!(matches!(
            bridge.process_batch(Vec::new()).await,
            Err(Error::Shutdown)
        ));
        assert!(matches!(
            bridge.start_async(&paths()).await,
            Err(Error::Shutdown)
        ));
    }

    #[tokio::test]
    async fn missing_pipes_are_initialization_errors() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Bridge::new(config(&dir), FakeWorker::new(dir.path(), Reply::Never)).unwrap();
        assert!(matches!(
            bridge.enqueue(&Record::from(&b"x"[..])).await,
            Err(Error::Initialization {
                what: "input control pipe",
                ..
            })
        ));
        assert!(matches!(
            bridge.next().await,
            Err(Error::Initialization {
                what: "output control pipe",
                ..
            })
        ));
        let stats = bridge.stats().await;
        assert!(stats.producer.is_none());
        assert!(stats.consumer.is_none());
    }

    #[tokio::test]
    async fn process_batch_goes_through_worker() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Bridge::new(
            config(&dir),
            FakeWorker::new(dir.path(), Reply::Echo { ready_after: 2 }),
        )
        .unwrap();
        let input = vec![Record::from(&b"a"[..]), Record::from(&b"b"[..])];
        let output = bridge.process_batch(input.clone()).await.unwrap();
        assert_eq!(output, input);
        assert_eq!(bridge.worker().polls.load(Ordering::SeqCst), 3);
    }
}
