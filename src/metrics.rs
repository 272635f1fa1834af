//! In-memory operational metrics.
//!
//! One process-wide [`MetricsCollector`] is constructed at startup and
//! injected into the stages that record against it. All mutation happens
//! under a single lock; percentile computation operates on a snapshot copy
//! taken inside the lock and processed outside it.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

/// Bounded reservoir size for response-time observations.
const RESERVOIR_SIZE: usize = 1000;

/// Named counters the pipeline stages increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    RequestsTotal,
    CacheHits,
    CacheMisses,
    PiiDetections,
    PiiBlocks,
    InjectionDetections,
    InjectionBlocks,
    RateLimitRejections,
    CircuitBreakerTrips,
}

#[derive(Debug, Default)]
struct Inner {
    requests_total: u64,
    cache_hits: u64,
    cache_misses: u64,
    pii_detections: u64,
    pii_blocks: u64,
    injection_detections: u64,
    injection_blocks: u64,
    rate_limit_rejections: u64,
    circuit_breaker_trips: u64,
    active_requests: i64,
    requests_by_status: BTreeMap<String, u64>,
    requests_by_endpoint: BTreeMap<String, u64>,
    response_times: VecDeque<f64>,
}

/// Process-wide counters, gauges, and a bounded latency reservoir.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    inner: Mutex<Inner>,
}

/// Point-in-time JSON-serializable view of all metrics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests: RequestStats,
    pub performance: PerformanceStats,
    pub cache: CacheStats,
    pub security: SecurityStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestStats {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_endpoint: BTreeMap<String, u64>,
    pub active: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceStats {
    pub avg_response_time_ms: f64,
    pub p50_response_time_ms: f64,
    pub p95_response_time_ms: f64,
    pub p99_response_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityStats {
    pub pii_detections: u64,
    pub pii_blocks: u64,
    pub injection_detections: u64,
    pub injection_blocks: u64,
    pub rate_limit_rejections: u64,
    pub circuit_breaker_trips: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one.
    pub fn increment(&self, counter: Counter) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        let slot = match counter {
            Counter::RequestsTotal => &mut inner.requests_total,
            Counter::CacheHits => &mut inner.cache_hits,
            Counter::CacheMisses => &mut inner.cache_misses,
            Counter::PiiDetections => &mut inner.pii_detections,
            Counter::PiiBlocks => &mut inner.pii_blocks,
            Counter::InjectionDetections => &mut inner.injection_detections,
            Counter::InjectionBlocks => &mut inner.injection_blocks,
            Counter::RateLimitRejections => &mut inner.rate_limit_rejections,
            Counter::CircuitBreakerTrips => &mut inner.circuit_breaker_trips,
        };
        *slot += 1;
    }

    /// Read a counter's current value.
    pub fn get(&self, counter: Counter) -> u64 {
        let inner = self.inner.lock().expect("metrics lock poisoned");
        match counter {
            Counter::RequestsTotal => inner.requests_total,
            Counter::CacheHits => inner.cache_hits,
            Counter::CacheMisses => inner.cache_misses,
            Counter::PiiDetections => inner.pii_detections,
            Counter::PiiBlocks => inner.pii_blocks,
            Counter::InjectionDetections => inner.injection_detections,
            Counter::InjectionBlocks => inner.injection_blocks,
            Counter::RateLimitRejections => inner.rate_limit_rejections,
            Counter::CircuitBreakerTrips => inner.circuit_breaker_trips,
        }
    }

    pub fn incr_active_requests(&self) {
        self.inner.lock().expect("metrics lock poisoned").active_requests += 1;
    }

    pub fn decr_active_requests(&self) {
        self.inner.lock().expect("metrics lock poisoned").active_requests -= 1;
    }

    /// Count a completed request against its HTTP status code.
    pub fn record_status(&self, status: u16) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        *inner
            .requests_by_status
            .entry(status.to_string())
            .or_insert(0) += 1;
    }

    /// Count a completed request against its endpoint path.
    pub fn record_endpoint(&self, path: &str) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        *inner
            .requests_by_endpoint
            .entry(path.to_string())
            .or_insert(0) += 1;
    }

    /// Record one response-time observation in seconds. The reservoir keeps
    /// the most recent [`RESERVOIR_SIZE`] samples.
    pub fn observe_response_time(&self, seconds: f64) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        if inner.response_times.len() == RESERVOIR_SIZE {
            inner.response_times.pop_front();
        }
        inner.response_times.push_back(seconds);
    }

    /// Clear all counters, gauges, maps, and observations atomically.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        *inner = Inner::default();
    }

    /// Produce a full snapshot. Percentiles are computed on a copy outside
    /// the lock.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (response_times, requests, cache, security) = {
            let inner = self.inner.lock().expect("metrics lock poisoned");
            (
                inner.response_times.iter().copied().collect::<Vec<f64>>(),
                RequestStats {
                    total: inner.requests_total,
                    by_status: inner.requests_by_status.clone(),
                    by_endpoint: inner.requests_by_endpoint.clone(),
                    active: inner.active_requests,
                },
                (inner.cache_hits, inner.cache_misses),
                SecurityStats {
                    pii_detections: inner.pii_detections,
                    pii_blocks: inner.pii_blocks,
                    injection_detections: inner.injection_detections,
                    injection_blocks: inner.injection_blocks,
                    rate_limit_rejections: inner.rate_limit_rejections,
                    circuit_breaker_trips: inner.circuit_breaker_trips,
                },
            )
        };

        let (hits, misses) = cache;
        let total_cache = hits + misses;
        let hit_rate = if total_cache > 0 {
            round3(hits as f64 / total_cache as f64)
        } else {
            0.0
        };

        MetricsSnapshot {
            requests,
            performance: percentiles(&response_times),
            cache: CacheStats {
                hits,
                misses,
                hit_rate,
            },
            security,
        }
    }
}

fn percentiles(samples: &[f64]) -> PerformanceStats {
    if samples.is_empty() {
        return PerformanceStats {
            avg_response_time_ms: 0.0,
            p50_response_time_ms: 0.0,
            p95_response_time_ms: 0.0,
            p99_response_time_ms: 0.0,
        };
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("NaN response time"));
    let n = sorted.len();
    let pick = |q: f64| sorted[((n as f64 * q) as usize).min(n - 1)] * 1000.0;
    let avg = sorted.iter().sum::<f64>() / n as f64 * 1000.0;
    PerformanceStats {
        avg_response_time_ms: round1(avg),
        p50_response_time_ms: round1(pick(0.5)),
        p95_response_time_ms: round1(pick(0.95)),
        p99_response_time_ms: round1(pick(0.99)),
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = MetricsCollector::new();
        assert_eq!(metrics.get(Counter::RequestsTotal), 0);
        assert_eq!(metrics.get(Counter::CircuitBreakerTrips), 0);
    }

    #[test]
    fn test_increment_and_get() {
        let metrics = MetricsCollector::new();
        metrics.increment(Counter::CacheHits);
        metrics.increment(Counter::CacheHits);
        metrics.increment(Counter::CacheMisses);
        assert_eq!(metrics.get(Counter::CacheHits), 2);
        assert_eq!(metrics.get(Counter::CacheMisses), 1);
    }

    #[test]
    fn test_active_requests_gauge() {
        let metrics = MetricsCollector::new();
        metrics.incr_active_requests();
        metrics.incr_active_requests();
        metrics.decr_active_requests();
        assert_eq!(metrics.snapshot().requests.active, 1);
    }

    #[test]
    fn test_status_and_endpoint_maps() {
        let metrics = MetricsCollector::new();
        metrics.record_status(200);
        metrics.record_status(200);
        metrics.record_status(429);
        metrics.record_endpoint("/v1/chat/completions");
        let snap = metrics.snapshot();
        assert_eq!(snap.requests.by_status.get("200"), Some(&2));
        assert_eq!(snap.requests.by_status.get("429"), Some(&1));
        assert_eq!(snap.requests.by_endpoint.get("/v1/chat/completions"), Some(&1));
    }

    #[test]
    fn test_hit_rate() {
        let metrics = MetricsCollector::new();
        metrics.increment(Counter::CacheHits);
        metrics.increment(Counter::CacheMisses);
        metrics.increment(Counter::CacheMisses);
        let snap = metrics.snapshot();
        assert_eq!(snap.cache.hit_rate, 0.333);
    }

    #[test]
    fn test_percentiles_on_known_distribution() {
        let metrics = MetricsCollector::new();
        for i in 1..=100 {
            metrics.observe_response_time(i as f64 / 1000.0);
        }
        let perf = metrics.snapshot().performance;
        assert_eq!(perf.p50_response_time_ms, 51.0);
        assert_eq!(perf.p95_response_time_ms, 96.0);
        assert_eq!(perf.p99_response_time_ms, 100.0);
        assert_eq!(perf.avg_response_time_ms, 50.5);
    }

    #[test]
    fn test_percentiles_empty() {
        let metrics = MetricsCollector::new();
        let perf = metrics.snapshot().performance;
        assert_eq!(perf.p50_response_time_ms, 0.0);
        assert_eq!(perf.avg_response_time_ms, 0.0);
    }

    #[test]
    fn test_reservoir_bounded() {
        let metrics = MetricsCollector::new();
        for _ in 0..(RESERVOIR_SIZE + 100) {
            metrics.observe_response_time(0.01);
        }
        let inner = metrics.inner.lock().unwrap();
        assert_eq!(inner.response_times.len(), RESERVOIR_SIZE);
    }

    #[test]
    fn test_reset_clears_everything() {
        let metrics = MetricsCollector::new();
        metrics.increment(Counter::RequestsTotal);
        metrics.record_status(200);
        metrics.observe_response_time(0.5);
        metrics.incr_active_requests();
        metrics.reset();
        let snap = metrics.snapshot();
        assert_eq!(snap.requests.total, 0);
        assert!(snap.requests.by_status.is_empty());
        assert_eq!(snap.requests.active, 0);
        assert_eq!(snap.performance.p50_response_time_ms, 0.0);
    }
}
