//! Retry policies used by source pipelines.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::{Error, Result};

/// Bounded retry with exponential backoff for the pre-extraction probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthCheckPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Sleep before the second attempt.
    pub initial_delay: Duration,
    /// Factor applied to the delay after each failed attempt.
    pub multiplier: f64,
}

impl Default for HealthCheckPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            multiplier: 1.5,
        }
    }
}

impl HealthCheckPolicy {
    /// Run `check` until it succeeds or the attempts are used up.
    ///
    /// Returns the last error when every attempt failed.
    pub async fn run<F, Fut>(&self, source: &str, mut check: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut delay = self.initial_delay;
        let mut attempt = 1;
        loop {
            match check().await {
                Ok(()) => {
                    if attempt > 1 {
                        info!(source = %source, attempt, "Health check succeeded after retry");
                    }
                    return Ok(());
                },
                Err(e) if attempt < attempts => {
                    warn!(
                        source = %source,
                        attempt,
                        max_attempts = attempts,
                        retry_in = format_args!("{:.1}s", delay.as_secs_f64()),
                        error = %e,
                        "Health check failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.mul_f64(self.multiplier);
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }
}

/// Decides whether a failed batch is retried once with a smaller window.
///
/// Only timeouts within the first `max_early_batches` batches qualify; large
/// early pages are the usual cause of slow cold queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRetryPolicy {
    /// Offsets below `max_early_batches * batch_size` may be retried.
    pub max_early_batches: u64,
    /// Smallest reduced window.
    pub reduction_floor: usize,
}

impl Default for BatchRetryPolicy {
    fn default() -> Self {
        Self {
            max_early_batches: 3,
            reduction_floor: 100,
        }
    }
}

impl BatchRetryPolicy {
    /// Window size for a one-off retry, or `None` to skip the window.
    ///
    /// The reduced size is half the batch, floored at `reduction_floor` and
    /// never larger than the original batch.
    pub fn reduced_batch(&self, error: &Error, offset: u64, batch_size: usize) -> Option<usize> {
        if !error.is_timeout() {
            return None;
        }
        if offset >= self.max_early_batches.saturating_mul(batch_size as u64) {
            return None;
        }
        Some((batch_size / 2).max(self.reduction_floor).min(batch_size).max(1))
    }
}
