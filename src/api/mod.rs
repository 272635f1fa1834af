//! HTTP surface: routes, trace/metrics middleware, and error mapping.

pub mod chat;
pub mod convert;
pub mod health;
pub mod metrics;
pub mod schemas;

use crate::error::GatewayError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::Instrument;
use uuid::Uuid;

/// Assemble the gateway's router with the trace middleware applied.
pub fn build_router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/health", get(health::health_check))
        .route("/metrics", get(metrics::metrics_snapshot))
        .route("/metrics/reset", post(metrics::reset_stats))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            trace_middleware,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Per-request tracing and metrics.
///
/// Assigns the trace id (inbound `X-Request-ID` or a fresh UUID), installs
/// it as a task-local and a span field for every log line downstream,
/// tracks the active-request gauge and per-status/per-endpoint counters,
/// and stamps `X-Request-ID` / `X-Response-Time` on the way out.
async fn trace_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    state.metrics.incr_active_requests();
    let start = Instant::now();

    let span = tracing::info_span!("request", trace_id = %trace_id, %method, %path);
    let mut response = crate::trace::with_trace_id(
        trace_id.clone(),
        async {
            let response = next.run(request).await;
            tracing::info!(status = response.status().as_u16(), "request handled");
            response
        }
        .instrument(span),
    )
    .await;

    let elapsed = start.elapsed();
    state.metrics.decr_active_requests();
    state.metrics.increment(crate::metrics::Counter::RequestsTotal);
    state.metrics.record_status(response.status().as_u16());
    state.metrics.record_endpoint(&path);
    state.metrics.observe_response_time(elapsed.as_secs_f64());

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        headers.insert("x-request-id", value);
    }
    let elapsed_ms = format!("{:.1}ms", elapsed.as_secs_f64() * 1000.0);
    if let Ok(value) = HeaderValue::from_str(&elapsed_ms) {
        headers.insert("x-response-time", value);
    }

    response
}

/// Stable machine-readable error category for response bodies and SSE
/// error frames.
pub(crate) fn error_kind(err: &GatewayError) -> &'static str {
    match err {
        GatewayError::InvalidRequest(_) | GatewayError::InvalidConfig(_) => "invalid_request",
        GatewayError::RateLimited { .. } => "rate_limit_exceeded",
        GatewayError::InjectionBlocked { .. } | GatewayError::PiiBlocked => "content_blocked",
        GatewayError::NoProvider(_) => "no_provider",
        GatewayError::AllProvidersFailed(_) => "all_providers_failed",
        GatewayError::Provider { .. }
        | GatewayError::ProviderUnavailable { .. }
        | GatewayError::ProviderRateLimited { .. }
        | GatewayError::CircuitOpen(_) => "provider_error",
        GatewayError::Cancelled => "cancelled",
        GatewayError::Transport(_)
        | GatewayError::Json(_)
        | GatewayError::Kv(_)
        | GatewayError::Other(_) => "internal_error",
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::InjectionBlocked { .. } | GatewayError::PiiBlocked => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::NoProvider(_) => StatusCode::NOT_FOUND,
            GatewayError::AllProvidersFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Detail stays in logs; the body carries the category and, for the
        // all-failed case, provider names only.
        let message = match &self {
            GatewayError::Transport(_)
            | GatewayError::Json(_)
            | GatewayError::Kv(_)
            | GatewayError::Other(_)
            | GatewayError::InvalidConfig(_) => {
                tracing::error!(error = %self, "internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(serde_json::json!({
            "error": {"message": message, "type": error_kind(&self)}
        }));

        let mut response = (status, body).into_response();
        if let GatewayError::RateLimited {
            limit,
            window_seconds,
        } = &self
        {
            let headers = response.headers_mut();
            headers.insert("retry-after", HeaderValue::from(*window_seconds));
            headers.insert("x-ratelimit-limit", HeaderValue::from(*limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(0u32));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                GatewayError::InvalidRequest("bad".to_string()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                GatewayError::RateLimited {
                    limit: 10,
                    window_seconds: 60,
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                GatewayError::InjectionBlocked { risk_score: 0.95 },
                StatusCode::BAD_REQUEST,
            ),
            (GatewayError::PiiBlocked, StatusCode::BAD_REQUEST),
            (
                GatewayError::NoProvider("m".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                GatewayError::AllProvidersFailed(Vec::new()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                GatewayError::Other("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_rate_limited_carries_headers() {
        let response = GatewayError::RateLimited {
            limit: 10,
            window_seconds: 60,
        }
        .into_response();
        assert_eq!(response.headers()["retry-after"], "60");
        assert_eq!(response.headers()["x-ratelimit-limit"], "10");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    }

    #[test]
    fn test_error_kind_categories() {
        assert_eq!(
            error_kind(&GatewayError::InjectionBlocked { risk_score: 0.9 }),
            "content_blocked"
        );
        assert_eq!(
            error_kind(&GatewayError::AllProvidersFailed(Vec::new())),
            "all_providers_failed"
        );
        assert_eq!(
            error_kind(&GatewayError::Other("x".to_string())),
            "internal_error"
        );
    }
}
