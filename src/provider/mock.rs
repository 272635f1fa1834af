//! Scriptable provider for tests.
//!
//! Returns queued outcomes in order (falling back to a fixed reply once the
//! queue drains) and counts invocations, so tests can assert on fallback
//! order, retry consumption, and cache short-circuiting. Goes through the
//! same breaker/retry plumbing as the real adapters.

use super::{
    execute_guarded, run_guarded_stream, ChunkSink, Provider, StreamBackend, StreamOutcome,
    StreamProbe,
};
use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::domain::{ChatRequest, ChatResponse, FinishReason, Message, Role, TokenUsage};
use crate::error::{GatewayError, Result};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted call outcome.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Succeed with this content.
    Reply(String),
    /// Fail as a 503.
    Unavailable,
    /// Fail as a 429.
    RateLimited,
    /// Fail with an arbitrary status and body.
    Error(u16, String),
}

pub struct MockProvider {
    name: String,
    models: Vec<String>,
    outcomes: Mutex<VecDeque<MockOutcome>>,
    default_reply: String,
    calls: AtomicUsize,
    healthy: bool,
    chunk_delay: Duration,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl MockProvider {
    /// A mock that always replies `"ok"`. Retry is configured with
    /// millisecond delays so scripted failure tests run fast.
    pub fn new(name: impl Into<String>, models: Vec<String>) -> Self {
        Self {
            name: name.into(),
            models,
            outcomes: Mutex::new(VecDeque::new()),
            default_reply: "ok".to_string(),
            calls: AtomicUsize::new(0),
            healthy: true,
            chunk_delay: Duration::ZERO,
            breaker: CircuitBreaker::new(3, Duration::from_secs(30)),
            retry: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4)),
        }
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_health(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }

    /// Pause between streamed chunks, so cancellation tests can interleave
    /// deterministically with the consumer.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Queue an outcome for an upcoming call. Outcomes are consumed in
    /// order; an empty queue yields the default reply.
    pub fn push_outcome(&self, outcome: MockOutcome) {
        self.outcomes
            .lock()
            .expect("mock outcomes lock poisoned")
            .push_back(outcome);
    }

    /// Queue the same failure outcome `n` times.
    pub fn push_failures(&self, outcome: MockOutcome, n: usize) {
        for _ in 0..n {
            self.push_outcome(outcome.clone());
        }
    }

    /// Number of upstream call attempts observed (retries included).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> MockOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .expect("mock outcomes lock poisoned")
            .pop_front()
            .unwrap_or_else(|| MockOutcome::Reply(self.default_reply.clone()))
    }

    fn outcome_to_error(&self, outcome: &MockOutcome) -> GatewayError {
        match outcome {
            MockOutcome::Unavailable => GatewayError::ProviderUnavailable {
                provider: self.name.clone(),
                status: 503,
            },
            MockOutcome::RateLimited => GatewayError::ProviderRateLimited {
                provider: self.name.clone(),
                retry_after: None,
            },
            MockOutcome::Error(status, body) => GatewayError::Provider {
                provider: self.name.clone(),
                status: *status,
                body: body.clone(),
            },
            MockOutcome::Reply(_) => unreachable!("reply is not an error"),
        }
    }

    async fn do_completion(&self, request: &ChatRequest) -> Result<ChatResponse> {
        match self.next_outcome() {
            MockOutcome::Reply(content) => Ok(ChatResponse {
                request_id: request.id,
                message: Message::new(Role::Assistant, content),
                model: request.model.clone(),
                provider: self.name.clone(),
                finish_reason: FinishReason::Stop,
                usage: TokenUsage {
                    prompt_tokens: 1,
                    completion_tokens: 1,
                    provider: self.name.clone(),
                    model: request.model.clone(),
                },
                latency_ms: 0.0,
                created_at: Utc::now(),
            }),
            failure => Err(self.outcome_to_error(&failure)),
        }
    }
}

#[async_trait]
impl StreamBackend for MockProvider {
    async fn open_stream(&self, _request: &ChatRequest, probe: &mut StreamProbe<'_>) -> Result<()> {
        match self.next_outcome() {
            MockOutcome::Reply(content) => {
                // Word-sized chunks so cancellation tests see multiple frames.
                for chunk in content.split_inclusive(' ') {
                    if !probe.push(chunk.to_string()) {
                        return Ok(());
                    }
                    if self.chunk_delay.is_zero() {
                        tokio::task::yield_now().await;
                    } else {
                        tokio::time::sleep(self.chunk_delay).await;
                    }
                }
                Ok(())
            }
            failure => Err(self.outcome_to_error(&failure)),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> Vec<String> {
        self.models.clone()
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.healthy)
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        execute_guarded(&self.name, &self.breaker, &self.retry, || {
            self.do_completion(request).boxed()
        })
        .await
    }

    async fn stream(&self, request: &ChatRequest, sink: ChunkSink<'_>) -> Result<StreamOutcome> {
        run_guarded_stream(&self.name, &self.breaker, &self.retry, self, request, sink).await
    }

    fn is_available(&self) -> bool {
        self.breaker.can_execute()
    }

    fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    fn reset_breaker(&self) {
        self.breaker.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitState;
    use crate::domain::ModelParameters;

    fn request() -> ChatRequest {
        ChatRequest::new(
            "test-model",
            vec![Message::new(Role::User, "ping")],
            ModelParameters::default(),
        )
    }

    #[tokio::test]
    async fn test_default_reply() {
        let provider = MockProvider::new("stub", vec!["test-model".to_string()]).with_reply("pong");
        let response = provider.complete(&request()).await.unwrap();
        assert_eq!(response.message.content, "pong");
        assert_eq!(response.provider, "stub");
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_scripted_outcomes_in_order() {
        let provider = MockProvider::new("stub", vec![]).with_reply("fallback");
        provider.push_outcome(MockOutcome::Reply("first".to_string()));
        provider.push_outcome(MockOutcome::Reply("second".to_string()));
        assert_eq!(
            provider.complete(&request()).await.unwrap().message.content,
            "first"
        );
        assert_eq!(
            provider.complete(&request()).await.unwrap().message.content,
            "second"
        );
        assert_eq!(
            provider.complete(&request()).await.unwrap().message.content,
            "fallback"
        );
    }

    #[tokio::test]
    async fn test_failures_consume_retries_and_count_on_breaker() {
        let provider = MockProvider::new("flaky", vec![]);
        provider.push_failures(MockOutcome::Unavailable, 3);
        let result = provider.complete(&request()).await;
        assert!(matches!(
            result,
            Err(GatewayError::ProviderUnavailable { status: 503, .. })
        ));
        // Three attempts consumed, breaker tripped at threshold 3.
        assert_eq!(provider.calls(), 3);
        assert_eq!(provider.breaker_snapshot().state, CircuitState::Open);
        assert!(!provider.is_available());
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_within_retry_budget() {
        let provider = MockProvider::new("flaky", vec![]).with_reply("recovered");
        provider.push_outcome(MockOutcome::Unavailable);
        let response = provider.complete(&request()).await.unwrap();
        assert_eq!(response.message.content, "recovered");
        assert_eq!(provider.calls(), 2);
        assert_eq!(provider.breaker_snapshot().failure_count, 0);
    }

    #[tokio::test]
    async fn test_streaming_chunks_and_completion() {
        let provider = MockProvider::new("stub", vec![]).with_reply("hello streaming world");
        let mut chunks = Vec::new();
        let outcome = provider
            .stream(&request(), &mut |chunk| {
                chunks.push(chunk);
                true
            })
            .await
            .unwrap();
        assert_eq!(chunks, vec!["hello ", "streaming ", "world"]);
        assert_eq!(
            outcome,
            StreamOutcome::Completed("hello streaming world".to_string())
        );
    }

    #[tokio::test]
    async fn test_streaming_cancellation_records_nothing() {
        let provider = MockProvider::new("stub", vec![]).with_reply("one two three four");
        let mut seen = 0;
        let outcome = provider
            .stream(&request(), &mut |_chunk| {
                seen += 1;
                seen < 2
            })
            .await
            .unwrap();
        assert!(matches!(outcome, StreamOutcome::Cancelled(_)));
        let snapshot = provider.breaker_snapshot();
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_health_check() {
        let healthy = MockProvider::new("up", vec![]);
        assert!(healthy.health_check().await.unwrap());
        let sick = MockProvider::new("down", vec![]).with_health(false);
        assert!(!sick.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_streaming_failure_before_first_chunk_retries() {
        let provider = MockProvider::new("flaky", vec![]).with_reply("late success");
        provider.push_outcome(MockOutcome::Unavailable);
        let mut chunks = Vec::new();
        let outcome = provider
            .stream(&request(), &mut |chunk| {
                chunks.push(chunk);
                true
            })
            .await
            .unwrap();
        assert!(matches!(outcome, StreamOutcome::Completed(_)));
        assert_eq!(provider.calls(), 2);
    }
}
