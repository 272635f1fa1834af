//! Provider adapters and shared provider plumbing.
//!
//! The [`Provider`] trait is the uniform capability set every upstream
//! vendor adapter implements. Each adapter owns one circuit breaker and one
//! retry policy; the free functions here compose them around the adapter's
//! raw HTTP calls so every vendor gets identical gating behavior.
//!
//! ```text
//! Router ──► Provider::complete() ──► execute_guarded ──► do_completion()
//!                                       breaker gate        vendor HTTP
//!                                       retry loop
//! ```

pub mod anthropic;
pub mod mock;
pub mod openai;
pub mod registry;
pub mod router;
pub mod sse;

pub use anthropic::AnthropicProvider;
pub use mock::{MockOutcome, MockProvider};
pub use openai::OpenAiProvider;
pub use registry::ProviderRegistry;
pub use router::Router;

use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::domain::{ChatRequest, ChatResponse};
use crate::error::{GatewayError, Result};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::time::Duration;

/// Callback sink for streamed content chunks. Returning `false` asks the
/// adapter to stop reading the upstream stream (client went away).
pub type ChunkSink<'a> = &'a mut (dyn FnMut(String) -> bool + Send);

/// How a streaming call ended. Both variants carry the accumulated text so
/// the caller can reconstruct the full response for evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The upstream stream ran to completion.
    Completed(String),
    /// The sink cancelled mid-stream; the breaker records neither success
    /// nor failure for a clean cancellation.
    Cancelled(String),
}

/// Uniform interface to one upstream vendor.
///
/// Object-safe; used as `Arc<dyn Provider>` by the registry and router.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider name used in chains, logs, and error reports.
    fn name(&self) -> &str;

    /// Models this provider serves.
    fn models(&self) -> Vec<String>;

    /// Probe the upstream for liveness. Not gated by the breaker.
    async fn health_check(&self) -> Result<bool>;

    /// Execute a non-streaming completion, gated by the breaker and wrapped
    /// by the retry policy.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Execute a streaming completion. Breaker success is recorded only
    /// after the stream completes without error; establishment errors are
    /// retried only until the first chunk reaches the sink.
    async fn stream(&self, request: &ChatRequest, sink: ChunkSink<'_>) -> Result<StreamOutcome>;

    /// Whether the breaker currently admits calls.
    fn is_available(&self) -> bool;

    /// Breaker state for the health endpoint.
    fn breaker_snapshot(&self) -> BreakerSnapshot;

    /// Force the breaker closed (used by the metrics reset endpoint).
    fn reset_breaker(&self);
}

/// Classify an upstream non-success status into the provider error taxonomy.
pub(crate) fn classify_status(
    provider: &str,
    status: u16,
    body: String,
    retry_after: Option<Duration>,
) -> GatewayError {
    match status {
        429 => GatewayError::ProviderRateLimited {
            provider: provider.to_string(),
            retry_after,
        },
        s if s >= 500 => GatewayError::ProviderUnavailable {
            provider: provider.to_string(),
            status,
        },
        _ => GatewayError::Provider {
            provider: provider.to_string(),
            status,
            body,
        },
    }
}

/// Parse a `Retry-After` header value given in seconds.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Breaker gate plus retry wrap for non-streaming calls.
///
/// The breaker is consulted once up front; every attempt then records its
/// own outcome, so a provider that fails through the whole retry budget
/// accrues one breaker failure per attempt.
pub(crate) async fn execute_guarded<'a, T, F>(
    name: &str,
    breaker: &'a CircuitBreaker,
    retry: &RetryPolicy,
    mut op: F,
) -> Result<T>
where
    T: Send + 'a,
    F: FnMut() -> BoxFuture<'a, Result<T>>,
{
    if !breaker.can_execute() {
        return Err(GatewayError::CircuitOpen(name.to_string()));
    }
    retry
        .execute(|| {
            let fut = op();
            async move {
                match fut.await {
                    Ok(value) => {
                        breaker.record_success();
                        Ok(value)
                    }
                    Err(err) => {
                        breaker.record_failure();
                        Err(err)
                    }
                }
            }
            .boxed()
        })
        .await
}

/// Wraps the caller's sink during a guarded stream, tracking whether any
/// chunk was emitted (which forbids retry) and accumulating the full text.
pub(crate) struct StreamProbe<'a> {
    sink: ChunkSink<'a>,
    emitted: bool,
    cancelled: bool,
    text: String,
}

impl<'a> StreamProbe<'a> {
    fn new(sink: ChunkSink<'a>) -> Self {
        Self {
            sink,
            emitted: false,
            cancelled: false,
            text: String::new(),
        }
    }

    /// Forward one chunk downstream. Returns `false` once the sink has
    /// cancelled; the adapter should stop reading and return `Ok(())`.
    pub(crate) fn push(&mut self, chunk: String) -> bool {
        if self.cancelled {
            return false;
        }
        self.emitted = true;
        self.text.push_str(&chunk);
        if !(self.sink)(chunk) {
            self.cancelled = true;
        }
        !self.cancelled
    }
}

/// Vendor-specific half of a streaming call: open the upstream stream and
/// feed chunks into the probe until it ends, the probe cancels, or the
/// transport fails.
#[async_trait]
pub(crate) trait StreamBackend: Send + Sync {
    async fn open_stream(&self, request: &ChatRequest, probe: &mut StreamProbe<'_>) -> Result<()>;
}

/// Breaker gate plus bounded re-establishment for streaming calls.
///
/// A failed attempt that emitted nothing is retried with backoff like a
/// non-streaming call. Once any chunk has reached the sink a failure is
/// terminal (replaying already-delivered content is not possible).
/// Breaker accounting: success only on clean completion, failure per failed
/// attempt, nothing for a clean client cancellation.
pub(crate) async fn run_guarded_stream(
    name: &str,
    breaker: &CircuitBreaker,
    retry: &RetryPolicy,
    backend: &dyn StreamBackend,
    request: &ChatRequest,
    sink: ChunkSink<'_>,
) -> Result<StreamOutcome> {
    if !breaker.can_execute() {
        return Err(GatewayError::CircuitOpen(name.to_string()));
    }
    let mut probe = StreamProbe::new(sink);
    let mut attempt = 1u32;
    loop {
        match backend.open_stream(request, &mut probe).await {
            Ok(()) => {
                if probe.cancelled {
                    return Ok(StreamOutcome::Cancelled(probe.text));
                }
                breaker.record_success();
                return Ok(StreamOutcome::Completed(probe.text));
            }
            Err(err) => {
                breaker.record_failure();
                if probe.emitted || attempt >= retry.max_attempts {
                    return Err(err);
                }
                let delay = retry.backoff_for_attempt(attempt);
                tracing::debug!(
                    provider = name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "stream establishment failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_429() {
        let err = classify_status("openai", 429, "slow down".to_string(), Some(Duration::from_secs(30)));
        assert!(matches!(
            err,
            GatewayError::ProviderRateLimited { retry_after: Some(d), .. } if d == Duration::from_secs(30)
        ));
    }

    #[test]
    fn test_classify_5xx() {
        for status in [500, 502, 503, 504] {
            let err = classify_status("openai", status, String::new(), None);
            assert!(matches!(err, GatewayError::ProviderUnavailable { .. }));
        }
    }

    #[test]
    fn test_classify_other_non_success() {
        let err = classify_status("openai", 400, "bad request".to_string(), None);
        assert!(
            matches!(err, GatewayError::Provider { status: 400, ref body, .. } if body == "bad request")
        );
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after(" 5 "), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2025 07:28:00 GMT"), None);
    }

    #[tokio::test]
    async fn test_execute_guarded_records_per_attempt() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        let retry = RetryPolicy::new(
            3,
            Duration::from_millis(1),
            Duration::from_millis(4),
        );
        let result: Result<()> = execute_guarded("test", &breaker, &retry, || {
            async {
                Err(GatewayError::ProviderUnavailable {
                    provider: "test".to_string(),
                    status: 503,
                })
            }
            .boxed()
        })
        .await;
        assert!(result.is_err());
        // Three failed attempts, threshold 3: the breaker is now open.
        assert_eq!(breaker.failure_count(), 3);
        assert_eq!(breaker.state(), crate::breaker::CircuitState::Open);
    }

    #[tokio::test]
    async fn test_execute_guarded_refuses_when_open() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        breaker.record_failure();
        let retry = RetryPolicy::default();
        let result: Result<()> =
            execute_guarded("test", &breaker, &retry, || async { Ok(()) }.boxed()).await;
        assert!(matches!(result, Err(GatewayError::CircuitOpen(name)) if name == "test"));
    }

    #[tokio::test]
    async fn test_execute_guarded_success_resets_breaker() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        breaker.record_failure();
        let retry = RetryPolicy::default();
        let result = execute_guarded("test", &breaker, &retry, || async { Ok(41) }.boxed()).await;
        assert_eq!(result.unwrap(), 41);
        assert_eq!(breaker.failure_count(), 0);
    }
}
