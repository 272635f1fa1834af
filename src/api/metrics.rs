//! Metrics endpoints.

use crate::metrics::MetricsSnapshot;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use std::time::Instant;

/// `GET /metrics` - JSON snapshot of all collected metrics.
pub async fn metrics_snapshot(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// `POST /metrics/reset` - clear counters, reset every provider breaker,
/// flush the KV cache keyspace, and restart the uptime clock. Intended for
/// clean test runs.
pub async fn reset_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.metrics.reset();
    for provider in state.registry.list_providers() {
        provider.reset_breaker();
    }
    if let Some(kv) = &state.kv {
        if let Err(err) = kv.flush_all().await {
            tracing::warn!(error = %err, "cache flush failed during reset");
        }
    }
    *state.start_time.lock().expect("start time lock poisoned") = Instant::now();
    Json(serde_json::json!({"status": "ok", "message": "stats and cache reset"}))
}
