//! Health endpoint.
//!
//! Aggregates KV connectivity (with latency) and every provider breaker
//! into one status: both down is unhealthy, either is degraded, otherwise
//! healthy.

use crate::breaker::{BreakerSnapshot, CircuitState};
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: f64,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub kv: KvCheck,
    pub circuit_breakers: BTreeMap<String, BreakerSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct KvCheck {
    pub status: &'static str,
    pub latency_ms: f64,
}

/// `GET /health`.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let kv = match &state.kv {
        None => KvCheck {
            status: "unhealthy",
            latency_ms: 0.0,
        },
        Some(kv) => {
            let start = Instant::now();
            let healthy = kv.ping().await.is_ok();
            KvCheck {
                status: if healthy { "healthy" } else { "unhealthy" },
                latency_ms: (start.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0,
            }
        }
    };

    let circuit_breakers: BTreeMap<String, BreakerSnapshot> = state
        .registry
        .list_providers()
        .into_iter()
        .map(|p| (p.name().to_string(), p.breaker_snapshot()))
        .collect();

    let kv_down = kv.status != "healthy";
    let any_breaker_open = circuit_breakers
        .values()
        .any(|snapshot| snapshot.state == CircuitState::Open);

    let status = match (kv_down, any_breaker_open) {
        (true, true) => "unhealthy",
        (true, false) | (false, true) => "degraded",
        (false, false) => "healthy",
    };

    let uptime_seconds = {
        let start = state.start_time.lock().expect("start time lock poisoned");
        (start.elapsed().as_secs_f64() * 10.0).round() / 10.0
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
        uptime_seconds,
        checks: HealthChecks {
            kv,
            circuit_breakers,
        },
    })
}
