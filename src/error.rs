use std::time::Duration;
use thiserror::Error;

/// Errors produced by the gateway and its components.
///
/// Infrastructure failures (KV store, judge, metrics) are logged and
/// swallowed at their call sites and never surface through this type to a
/// client. Policy failures (blocking, rate limiting) are user-visible.
/// Provider failures are consumed by the router and only escalate as
/// [`GatewayError::AllProvidersFailed`].
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Request body failed semantic validation (empty messages, bad range).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid configuration detected at startup.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Client exceeded the sliding-window rate limit.
    #[error("rate limit exceeded: {limit} requests per {window_seconds}s")]
    RateLimited {
        /// Maximum requests admitted per window.
        limit: u32,
        /// Window length in seconds, echoed as `Retry-After`.
        window_seconds: u64,
    },

    /// Prompt injection scan scored at or above the block threshold.
    #[error("request blocked: prompt injection detected")]
    InjectionBlocked {
        /// Combined risk score that triggered the block.
        risk_score: f64,
    },

    /// PII shield in block mode found sensitive content.
    #[error("request blocked: sensitive content detected")]
    PiiBlocked,

    /// No provider is registered or chained for the requested model.
    #[error("no provider available for model '{0}'")]
    NoProvider(String),

    /// Every provider in the fallback chain failed (or was skipped).
    ///
    /// The error list pairs each attempted provider's name with the error it
    /// produced. An all-skipped chain (every breaker open) yields an empty
    /// list.
    #[error("all providers failed ({})", failed_provider_names(.0))]
    AllProvidersFailed(Vec<(String, GatewayError)>),

    /// Upstream returned a non-success status other than 429/5xx.
    #[error("provider '{provider}' returned HTTP {status}: {body}")]
    Provider {
        /// Provider name.
        provider: String,
        /// HTTP status code.
        status: u16,
        /// Response body text.
        body: String,
    },

    /// Upstream returned a 5xx status or is otherwise unreachable.
    #[error("provider '{provider}' unavailable (HTTP {status})")]
    ProviderUnavailable {
        /// Provider name.
        provider: String,
        /// HTTP status code.
        status: u16,
    },

    /// Upstream returned 429.
    #[error("provider '{provider}' rate limited")]
    ProviderRateLimited {
        /// Provider name.
        provider: String,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// The provider's circuit breaker refused the call. Consumed by the
    /// router as a skip signal; never user-visible.
    #[error("circuit breaker open for provider '{0}'")]
    CircuitOpen(String),

    /// The client disconnected mid-stream.
    #[error("stream cancelled by client")]
    Cancelled,

    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// JSON (de)serialization failed at the serde level.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// KV store operation failed. Logged and swallowed by cache, rate
    /// limiter, and judge recorder per the fail-open policy.
    #[error("KV store error: {0}")]
    Kv(#[from] redis::RedisError),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    /// Names of the providers recorded in an [`AllProvidersFailed`] error.
    ///
    /// [`AllProvidersFailed`]: GatewayError::AllProvidersFailed
    pub fn failed_providers(&self) -> Vec<&str> {
        match self {
            GatewayError::AllProvidersFailed(errors) => {
                errors.iter().map(|(name, _)| name.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn failed_provider_names(errors: &[(String, GatewayError)]) -> String {
    if errors.is_empty() {
        return "all providers skipped".to_string();
    }
    errors
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<anyhow::Error> for GatewayError {
    fn from(err: anyhow::Error) -> Self {
        GatewayError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
