//! Retry delays for connection attempts
//!
//! Delays grow linearly with the attempt number and are capped, after
//! `retry_times` failed attempts the connection error is returned.

use redscope_core::{RedscopeError, Result};
use std::future::Future;
use std::time::Duration;

/// Upper bound for a single retry delay
pub const MAX_RETRY_DELAY_MS: u64 = 2_000;

/// Linear, capped retry strategy for connection attempts.
///
/// # Example
///
/// ```
/// use redscope_driver_redis::RetryStrategy;
/// use std::time::Duration;
///
/// let retry = RetryStrategy::new(3, 500);
///
/// assert_eq!(retry.delay_for(1), Some(Duration::from_millis(500)));
/// assert_eq!(retry.delay_for(2), Some(Duration::from_millis(1000)));
/// assert_eq!(retry.delay_for(3), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryStrategy {
    retry_times: u32,
    retry_delay_ms: u64,
}

impl RetryStrategy {
    pub fn new(retry_times: u32, retry_delay_ms: u64) -> Self {
        Self {
            retry_times,
            retry_delay_ms,
        }
    }

    /// A strategy that never retries
    pub fn none() -> Self {
        Self::new(0, 0)
    }

    pub fn retry_times(&self) -> u32 {
        self.retry_times
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Delay before the next attempt after `failed_attempts` failures, or
    /// `None` when no attempts are left
    pub fn delay_for(&self, failed_attempts: u32) -> Option<Duration> {
        if failed_attempts == 0 || failed_attempts >= self.retry_times {
            return None;
        }

        let delay_ms = (failed_attempts as u64)
            .saturating_mul(self.retry_delay_ms)
            .min(MAX_RETRY_DELAY_MS);
        Some(Duration::from_millis(delay_ms))
    }

    /// Run `attempt` until it succeeds or the strategy gives up.
    ///
    /// Only connection-class errors are retried; anything else (bad
    /// configuration, rejected credentials reported as commands) is final.
    pub async fn run<T, F, Fut>(&self, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut failed_attempts = 0;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) if is_retryable(&err) => {
                    failed_attempts += 1;
                    let Some(delay) = self.delay_for(failed_attempts) else {
                        return Err(err);
                    };
                    tracing::debug!(
                        attempt = failed_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "connection attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryStrategy {
    /// Default: 3 attempts, 500ms step
    fn default() -> Self {
        Self::new(3, 500)
    }
}

fn is_retryable(err: &RedscopeError) -> bool {
    matches!(err, RedscopeError::Connection(_) | RedscopeError::Timeout(_))
}
