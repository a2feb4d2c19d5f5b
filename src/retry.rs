//! Bounded retry with exponential backoff and jitter.

use rand::Rng;
use reverse_core::{ReplicationError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::metrics::ProcessorMetrics;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100), Duration::from_secs(5))
    }
}

impl RetryPolicy {
    /// `max_attempts` counts the first try; zero is treated as one.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Capped exponential delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Backoff with "equal jitter": half fixed, half random.
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let capped = self.backoff(attempt);
        let half = capped / 2;
        let jitter_ms = half.as_millis() as u64;
        if jitter_ms == 0 {
            return capped;
        }
        half + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }

    /// Run `operation` under `timeout`, retrying retryable failures.
    ///
    /// A call that outlives `timeout` fails with [`ReplicationError::Timeout`],
    /// which is itself retryable. Non-retryable errors return immediately.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        timeout: Duration,
        metrics: &ProcessorMetrics,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(ReplicationError::Timeout(timeout)),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_with_jitter(attempt);
                    warn!(
                        "{label} failed (attempt {attempt}/{}), retrying in {delay:?}: {e}",
                        self.max_attempts
                    );
                    metrics.record_retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
