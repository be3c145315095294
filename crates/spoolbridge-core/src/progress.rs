//! Consumer progress and shutdown signalling.
//!
//! The consumer publishes the id of every batch it opens. The producer
//! watches that value to keep the number of announced-but-unconsumed batches
//! under the throttle limit, and both sides watch the shutdown flag so a
//! blocked call returns once the bridge is stopped.

use std::sync::Arc;

use tokio::sync::watch;

use crate::batch::{BatchId, outstanding_batches};
use crate::error::{Error, Result};

/// Consumer side of the progress channel.
#[derive(Debug, Clone)]
pub struct ProgressPublisher {
    tx: Arc<watch::Sender<Option<BatchId>>>,
}

impl Default for ProgressPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressPublisher {
    /// Fresh channel with no batch seen yet.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Record that the consumer opened batch `id`.
    pub fn publish(&self, id: BatchId) {
        self.tx.send_replace(Some(id));
    }

    #[must_use]
    pub fn last_seen(&self) -> Option<BatchId> {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> ProgressWatcher {
        ProgressWatcher {
            rx: self.tx.subscribe(),
        }
    }
}

/// Producer side of the progress channel.
#[derive(Debug, Clone)]
pub struct ProgressWatcher {
    rx: watch::Receiver<Option<BatchId>>,
}

impl ProgressWatcher {
    #[must_use]
    pub fn last_seen(&self) -> Option<BatchId> {
        *self.rx.borrow()
    }

    /// Announced-but-unconsumed batches given the producer's next id.
    #[must_use]
    pub fn outstanding(&self, next_batch_id: BatchId) -> u64 {
        outstanding_batches(next_batch_id, self.last_seen())
    }

    /// Wait until at most `limit` batches are outstanding.
    ///
    /// Fails with [`Error::ControlChannelClosed`] if every publisher is gone
    /// while the condition still does not hold.
    pub async fn wait_within(&mut self, next_batch_id: BatchId, limit: u64) -> Result<()> {
        self.rx
            .wait_for(|seen| outstanding_batches(next_batch_id, *seen) <= limit)
            .await
            .map(|_| ())
            .map_err(|_| Error::ControlChannelClosed)
    }
}

/// Raises the bridge-wide stop flag.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl Default for ShutdownTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownTrigger {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: Some(self.tx.subscribe()),
        }
    }
}

/// Observes the stop flag. A dropped trigger counts as a stop.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl ShutdownSignal {
    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        Self { rx: None }
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.rx
            .as_ref()
            .is_some_and(|rx| *rx.borrow() || rx.has_changed().is_err())
    }

    /// Resolve once shutdown is requested; pending forever for [`Self::never`].
    pub async fn triggered(&mut self) {
        match self.rx.as_mut() {
            Some(rx) => {
                let _ = rx.wait_for(|stopped| *stopped).await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn publisher_starts_with_nothing_seen() {
        let publisher = ProgressPublisher::new();
        let watcher = publisher.subscribe();
        assert_eq!(publisher.last_seen(), None);
        assert_eq!(watcher.outstanding(0), 1);
        publisher.publish(4);
        assert_eq!(watcher.last_seen(), Some(4));
        assert_eq!(watcher.outstanding(6), 2);
    }

    #[tokio::test]
    async fn wait_within_returns_immediately_under_limit() {
        let publisher = ProgressPublisher::new();
        let mut watcher = publisher.subscribe();
        watcher.wait_within(3, 30).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_within_blocks_until_consumer_catches_up() {
        let publisher = ProgressPublisher::new();
        publisher.publish(0);
        let mut watcher = publisher.subscribe();

        let waiter = tokio::spawn(async move { watcher.wait_within(31, 30).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        publisher.publish(1);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn wait_within_fails_when_publisher_dropped() {
        let publisher = ProgressPublisher::new();
        let mut watcher = publisher.subscribe();
        drop(publisher);
        let err = watcher.wait_within(31, 30).await.unwrap_err();
        assert!(matches!(err, Error::ControlChannelClosed));
    }

    #[tokio::test]
    async fn shutdown_signal_fires_on_trigger() {
        let trigger = ShutdownTrigger::new();
        let mut signal = trigger.signal();
        assert!(!signal.is_triggered());
        trigger.trigger();
        assert!(trigger.is_triggered());
        assert!(signal.is_triggered());
        signal.triggered().await;
    }

    #[tokio::test]
    async fn dropped_trigger_counts_as_shutdown() {
        let trigger = ShutdownTrigger::new();
        let mut signal = trigger.signal();
        drop(trigger);
        assert!(signal.is_triggered());
        signal.triggered().await;
    }

    #[tokio::test(start_paused = true)]
    async fn never_signal_stays_pending() {
        let mut signal = ShutdownSignal::never();
        assert!(!signal.is_triggered());
        let fired = tokio::time::timeout(Duration::from_secs(60), signal.triggered()).await;
        assert!(fired.is_err());
    }
}
