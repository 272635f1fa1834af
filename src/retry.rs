//! Bounded retry with exponential backoff and jitter.
//!
//! [`RetryPolicy`] wraps an async operation, retrying on any error up to
//! `max_attempts` total calls. It is the caller's choice to wrap only
//! idempotent operations. Each adapter owns one policy.

use crate::error::Result;
use futures::future::BoxFuture;
use std::time::Duration;

/// Retry policy parameters.
///
/// Backoff before retry attempt `n` (1-indexed) is
/// `min(max_delay, base_delay * 2^n + U[0, base_delay))`, jittered to avoid
/// thundering-herd synchronization against shared rate limits.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total call budget, including the first attempt. Minimum 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(40))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Backoff duration before the retry that follows failed attempt
    /// `attempt` (1-indexed).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let raw = base * 2f64.powi(attempt as i32) + fastrand::f64() * base;
        Duration::from_secs_f64(raw.min(self.max_delay.as_secs_f64()))
    }

    /// Call `op` until it succeeds or the attempt budget is exhausted.
    /// The final error is propagated unchanged.
    pub async fn execute<'a, T, F>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> BoxFuture<'a, Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.backoff_for_attempt(attempt);
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
