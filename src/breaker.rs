//! Per-provider circuit breaker.
//!
//! Three-state failure-tracking machine gating calls to one upstream. Each
//! adapter owns exactly one breaker; all transitions happen under the
//! breaker's own mutex, giving callers a serializable view of its state.

use crate::metrics::{Counter, MetricsCollector};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are refused until the recovery timeout elapses.
    Open,
    /// One trial call is admitted; its outcome decides the next state.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    /// Unix seconds of the most recent failure; 0.0 before any failure.
    last_failure_time: f64,
}

/// Circuit breaker guarding one provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
    metrics: Option<Arc<MetricsCollector>>,
}

/// Read-only view of breaker state for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: 0.0,
            }),
            metrics: None,
        }
    }

    /// Record breaker trips against the given collector.
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn now() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Whether a call may proceed right now.
    ///
    /// From `Open`, once the recovery timeout has elapsed this atomically
    /// transitions to `HalfOpen` and admits the caller; the first caller to
    /// take the lock wins the trial slot.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::Open => {
                if Self::now() - inner.last_failure_time > self.recovery_timeout.as_secs_f64() {
                    inner.state = CircuitState::HalfOpen;
                    tracing::info!("circuit breaker half-open, admitting trial call");
                    true
                } else {
                    false
                }
            }
            CircuitState::Closed | CircuitState::HalfOpen => true,
        }
    }

    /// Record a successful call: reset the failure count and close.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.failure_count = 0;
        inner.state = CircuitState::Closed;
    }

    /// Record a failed call. Opens the breaker once the consecutive failure
    /// count reaches the threshold; a half-open trial failure re-opens.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.failure_count += 1;
        inner.last_failure_time = Self::now();
        if inner.failure_count >= self.failure_threshold {
            let tripped = inner.state != CircuitState::Open;
            inner.state = CircuitState::Open;
            if tripped {
                if let Some(metrics) = &self.metrics {
                    metrics.increment(Counter::CircuitBreakerTrips);
                }
                tracing::warn!(
                    failures = inner.failure_count,
                    "circuit breaker tripped open"
                );
            }
        }
    }

    /// Force the breaker back to a clean closed state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure_time = 0.0;
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().expect("breaker lock poisoned").failure_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        let last_failure = if inner.last_failure_time > 0.0 {
            DateTime::<Utc>::from_timestamp(
                inner.last_failure_time as i64,
                (inner.last_failure_time.fract() * 1e9) as u32,
            )
        } else {
            None
        };
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker_with(threshold: u32, recovery: Duration) -> CircuitBreaker {
        CircuitBreaker::new(threshold, recovery)
    }

    #[test]
    fn test_closed_allows_execution() {
        let breaker = breaker_with(3, Duration::from_secs(30));
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let breaker = breaker_with(3, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let breaker = breaker_with(3, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.failure_count(), 0);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_after_recovery_timeout() {
        let breaker = breaker_with(1, Duration::from_millis(20));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let breaker = breaker_with(1, Duration::from_millis(20));
        breaker.record_failure();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(breaker.can_execute());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_and_count_continues() {
        let breaker = breaker_with(1, Duration::from_millis(20));
        breaker.record_failure();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(breaker.can_execute());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.failure_count(), 2);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn test_reset_clears_state() {
        let breaker = breaker_with(1, Duration::from_secs(30));
        breaker.record_failure();
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.snapshot().last_failure.is_none());
    }

    #[test]
    fn test_trip_increments_metrics_once() {
        let metrics = Arc::new(MetricsCollector::new());
        let breaker =
            breaker_with(2, Duration::from_secs(30)).with_metrics(metrics.clone());
        breaker.record_failure();
        assert_eq!(metrics.get(Counter::CircuitBreakerTrips), 0);
        breaker.record_failure();
        assert_eq!(metrics.get(Counter::CircuitBreakerTrips), 1);
        // Further failures while already open do not re-trip.
        breaker.record_failure();
        assert_eq!(metrics.get(Counter::CircuitBreakerTrips), 1);
    }

    #[test]
    fn test_snapshot_records_last_failure() {
        let breaker = breaker_with(3, Duration::from_secs(30));
        assert!(breaker.snapshot().last_failure.is_none());
        breaker.record_failure();
        let snap = breaker.snapshot();
        assert!(snap.last_failure.is_some());
        assert_eq!(snap.failure_count, 1);
    }
}
