//! Per-client sliding-window rate limiter.
//!
//! Keeps an ordered set of request timestamps per client identifier in the
//! shared KV store (`rate:<identifier>`). Admission prunes entries older
//! than the window, counts the remainder, and appends the current timestamp
//! if under the limit, all as one atomic KV operation. Fails open: a KV
//! error admits the request.

use crate::kv::KvStore;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    max_requests: u32,
    window_seconds: u64,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, max_requests: u32, window_seconds: u64) -> Self {
        Self {
            kv,
            max_requests,
            window_seconds,
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    fn key(identifier: &str) -> String {
        format!("rate:{}", identifier)
    }

    fn now() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Whether the identifier may make a request right now. Admission also
    /// consumes one slot in the window.
    pub async fn is_allowed(&self, identifier: &str) -> bool {
        let now = Self::now();
        let window_start = now - self.window_seconds as f64;
        match self
            .kv
            .window_admit(
                &Self::key(identifier),
                window_start,
                self.max_requests,
                now,
                self.window_seconds,
            )
            .await
        {
            Ok(admitted) => admitted,
            Err(err) => {
                tracing::warn!(
                    identifier,
                    error = %err,
                    "rate limit check failed, failing open"
                );
                true
            }
        }
    }

    /// Remaining requests in the current window. Returns the full limit on
    /// KV failure, consistent with fail-open admission.
    pub async fn get_remaining(&self, identifier: &str) -> u32 {
        let now = Self::now();
        let window_start = now - self.window_seconds as f64;
        match self
            .kv
            .window_count(&Self::key(identifier), window_start, now)
            .await
        {
            Ok(count) => self.max_requests.saturating_sub(count),
            Err(err) => {
                tracing::warn!(
                    identifier,
                    error = %err,
                    "rate limit count failed, reporting full limit"
                );
                self.max_requests
            }
        }
    }
}
