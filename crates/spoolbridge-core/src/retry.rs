//! Bounded polling for results that are not ready yet.
//!
//! The synchronous bridge asks the worker for a result path and, while the
//! worker answers "not yet", waits and asks again with the same input. The
//! loop here owns the attempt budget and the delay schedule.
//!
//! # Usage
//!
//! ```rust,ignore
//! use spoolbridge_core::retry::{RetryPolicy, poll_until_ready};
//!
//! let policy = RetryPolicy::fixed(Duration::from_secs(1), 10);
//! let outcome = poll_until_ready(&policy, || async { check_result() }).await;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::SyncConfig;

/// Delay schedule and attempt budget for a poll loop.
///
/// The wait after poll `n` is `delay * backoff_factor^(n-1)`, capped at
/// `max_delay`, then spread by up to `±jitter` of itself. With the defaults
/// (`backoff_factor = 1.0`, `jitter = 0.0`) every wait is exactly `delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter: f64,
    /// Total number of polls, the first one included.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_sync_config(&SyncConfig::default())
    }
}

impl RetryPolicy {
    /// Same delay between every poll.
    #[must_use]
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_delay: delay,
            backoff_factor: 1.0,
            jitter: 0.0,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Policy for ad-hoc batches as configured under `[sync]`.
    #[must_use]
    pub fn from_sync_config(config: &SyncConfig) -> Self {
        Self {
            delay: config.retry_delay(),
            max_delay: config.retry_max_delay().max(config.retry_delay()),
            backoff_factor: if config.retry_backoff_factor.is_finite() {
                config.retry_backoff_factor.max(1.0)
            } else {
                1.0
            },
            jitter: if config.retry_jitter.is_finite() {
                config.retry_jitter.clamp(0.0, 1.0)
            } else {
                0.0
            },
            max_attempts: config.retry_attempts.max(1),
        }
    }

    /// Wait that follows the poll numbered `completed` (1-based).
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_after(&self, completed: u32) -> Duration {
        let steps = i32::try_from(completed.saturating_sub(1).min(64)).unwrap_or(64);
        let base_ns = self.delay.as_nanos() as f64;
        let max_ns = self.max_delay.as_nanos() as f64;
        let mut delay_ns = (base_ns * self.backoff_factor.powi(steps)).min(max_ns);
        if self.jitter > 0.0 {
            let spread = rand::rng().random_range(-self.jitter..=self.jitter);
            delay_ns += delay_ns * spread;
        }
        Duration::from_nanos(delay_ns.max(0.0) as u64)
    }
}

/// Outcome of a poll loop.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The ready value, or `None` when the budget ran out.
    pub result: Option<T>,
    /// Number of attempts made.
    pub attempts: u32,
    /// Total time spent (including delays).
    pub elapsed: Duration,
}

/// Call `poll` until it yields a value or `policy.max_attempts` calls were
/// made, sleeping between calls.
///
/// No sleep follows the last attempt, so an exhausted budget of `n` attempts
/// waits through exactly `n - 1` delays.
pub async fn poll_until_ready<T, F, Fut>(policy: &RetryPolicy, mut poll: F) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let start = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if let Some(value) = poll().await {
            if attempt > 1 {
                debug!(attempt, max_attempts, "Result ready after polling");
            }
            return RetryOutcome {
                result: Some(value),
                attempts: attempt,
                elapsed: start.elapsed(),
            };
        }

        if attempt >= max_attempts {
            warn!(
                attempt,
                max_attempts,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Result not ready after all attempts"
            );
            return RetryOutcome {
                result: None,
                attempts: attempt,
                elapsed: start.elapsed(),
            };
        }

        let delay = policy.delay_after(attempt);
        debug!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Result not ready, polling again"
        );
        tokio::time::sleep(delay).await;
    }
}
