//! The per-request processing pipeline.
//!
//! Stages run in a fixed order: rate limit, PII shield, injection detector,
//! semantic cache, exact cache, router. Rejections happen as early and as
//! cheaply as possible; content is sanitized before any cache or provider
//! sees it; the semantic lookup precedes the exact one because the exact
//! key depends on post-redaction content. Unconfigured stages are skipped.
//!
//! Streaming requests share the gating stages, then replace the cache and
//! response steps with a chunk pump feeding an SSE channel. The judge runs
//! fire-and-forget in both modes, after the response is on its way out.

use crate::cache::ExactCache;
use crate::domain::{ChatRequest, ChatResponse, Message};
use crate::error::{GatewayError, Result};
use crate::judge::{JudgeEvaluator, JudgeRecorder};
use crate::metrics::{Counter, MetricsCollector};
use crate::provider::{Router, StreamOutcome};
use crate::rate_limit::RateLimiter;
use crate::semantic_cache::SemanticCache;
use crate::shield::{InjectionAction, InjectionDetector, PiiAction, PiiShield};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// How the pipeline answered a non-streaming request.
#[derive(Debug)]
pub enum PipelineReply {
    /// Served by a provider on the cold path.
    Fresh(ChatResponse),
    /// Replay of a previously stored response, byte-for-byte.
    CachedExact(ChatResponse),
    /// Response to a semantically near-duplicate earlier query.
    CachedSemantic {
        content: String,
        model: String,
        score: f32,
    },
}

/// One event on a streaming response channel.
#[derive(Debug)]
pub enum StreamEvent {
    Chunk(String),
    Done,
    /// Mid-stream upstream failure; rendered as a final error frame.
    Failed(GatewayError),
}

/// Consumer side of a streaming response. The first event has already been
/// awaited (so chain failures before any output surface as HTTP errors);
/// dropping this cancels the upstream stream within one frame.
#[derive(Debug)]
pub struct ChunkStream {
    first: Option<StreamEvent>,
    rx: mpsc::UnboundedReceiver<StreamEvent>,
}

impl ChunkStream {
    pub async fn next(&mut self) -> Option<StreamEvent> {
        if let Some(event) = self.first.take() {
            return Some(event);
        }
        self.rx.recv().await
    }
}

#[derive(Clone)]
struct JudgeHandles {
    evaluator: Arc<JudgeEvaluator>,
    recorder: Option<Arc<JudgeRecorder>>,
}

pub struct Pipeline {
    rate_limiter: Option<Arc<RateLimiter>>,
    pii_shield: Option<Arc<PiiShield>>,
    injection: Option<Arc<InjectionDetector>>,
    semantic_cache: Option<Arc<SemanticCache>>,
    exact_cache: Option<Arc<ExactCache>>,
    router: Arc<Router>,
    judge: Option<JudgeHandles>,
    metrics: Arc<MetricsCollector>,
}

impl Pipeline {
    pub fn builder(router: Arc<Router>, metrics: Arc<MetricsCollector>) -> PipelineBuilder {
        PipelineBuilder {
            rate_limiter: None,
            pii_shield: None,
            injection: None,
            semantic_cache: None,
            exact_cache: None,
            router,
            judge: None,
            metrics,
        }
    }

    /// Run a non-streaming request through every stage.
    pub async fn execute(&self, request: &mut ChatRequest, client_id: &str) -> Result<PipelineReply> {
        self.check_rate_limit(client_id).await?;
        self.apply_pii_shield(&mut request.messages)?;
        self.scan_injection(&request.messages)?;

        if let Some(semantic) = &self.semantic_cache {
            if let Some(query) = request.last_user_content() {
                if let Some(hit) = semantic.lookup(query).await {
                    self.metrics.increment(Counter::CacheHits);
                    tracing::debug!(score = hit.score, "semantic cache hit");
                    return Ok(PipelineReply::CachedSemantic {
                        content: hit.response,
                        model: hit.model,
                        score: hit.score,
                    });
                }
            }
        }

        let cache_key = self.exact_cache.as_ref().map(|_| {
            ExactCache::generate_key(
                &request.model,
                &request.messages,
                request.parameters.temperature,
                request.parameters.max_tokens,
            )
        });
        if let (Some(cache), Some(key)) = (&self.exact_cache, &cache_key) {
            if let Some(payload) = cache.get(key).await {
                match serde_json::from_value::<ChatResponse>(payload) {
                    Ok(response) => {
                        self.metrics.increment(Counter::CacheHits);
                        tracing::debug!("exact cache hit");
                        return Ok(PipelineReply::CachedExact(response));
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "cached payload unusable, treating as miss");
                    }
                }
            }
            self.metrics.increment(Counter::CacheMisses);
        }

        let response = self.router.route(request).await?;

        if let (Some(cache), Some(key)) = (&self.exact_cache, &cache_key) {
            match serde_json::to_value(&response) {
                Ok(payload) => cache.set(key, &payload, None).await,
                Err(err) => tracing::warn!(error = %err, "response not cacheable"),
            }
        }
        if let Some(semantic) = &self.semantic_cache {
            if let Some(query) = request.last_user_content() {
                semantic
                    .store(query, &response.message.content, &response.model)
                    .await;
            }
        }

        self.schedule_judge(
            request.id,
            request.last_user_content().map(str::to_string),
            response.message.content.clone(),
        );

        Ok(PipelineReply::Fresh(response))
    }

    /// Run a streaming request: gate, then pump provider chunks into a
    /// channel. Chain failures before the first chunk surface as errors
    /// here; later failures arrive as a [`StreamEvent::Failed`] frame.
    pub async fn stream(&self, mut request: ChatRequest, client_id: &str) -> Result<ChunkStream> {
        self.check_rate_limit(client_id).await?;
        self.apply_pii_shield(&mut request.messages)?;
        self.scan_injection(&request.messages)?;

        let (tx, mut rx) = mpsc::unbounded_channel::<StreamEvent>();
        let router = self.router.clone();
        let judge = self.judge.clone();
        let user_message = request.last_user_content().map(str::to_string);
        let request_id = request.id;
        let trace_id = crate::trace::current_trace_id();

        tokio::spawn(crate::trace::with_trace_id(trace_id, async move {
            let mut sink = |chunk: String| tx.send(StreamEvent::Chunk(chunk)).is_ok();
            match router.stream(&request, &mut sink).await {
                Ok(StreamOutcome::Completed(full_text)) => {
                    let _ = tx.send(StreamEvent::Done);
                    drop(tx);
                    if let (Some(judge), Some(user_message)) = (judge, user_message) {
                        let result = judge.evaluator.evaluate(&user_message, &full_text).await;
                        if let Some(recorder) = &judge.recorder {
                            recorder.record(request_id, &result).await;
                        }
                    }
                }
                Ok(StreamOutcome::Cancelled(_)) => {
                    tracing::debug!("client disconnected mid-stream, upstream cancelled");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "streaming failed");
                    let _ = tx.send(StreamEvent::Failed(err));
                }
            }
        }));

        match rx.recv().await {
            None => Err(GatewayError::Other(
                "stream ended before producing any event".to_string(),
            )),
            Some(StreamEvent::Failed(err)) => Err(err),
            Some(first) => Ok(ChunkStream {
                first: Some(first),
                rx,
            }),
        }
    }

    async fn check_rate_limit(&self, client_id: &str) -> Result<()> {
        let Some(limiter) = &self.rate_limiter else {
            return Ok(());
        };
        if limiter.is_allowed(client_id).await {
            return Ok(());
        }
        self.metrics.increment(Counter::RateLimitRejections);
        tracing::warn!(client_id, "rate limit exceeded");
        Err(GatewayError::RateLimited {
            limit: limiter.max_requests(),
            window_seconds: limiter.window_seconds(),
        })
    }

    fn apply_pii_shield(&self, messages: &mut [Message]) -> Result<()> {
        let Some(shield) = &self.pii_shield else {
            return Ok(());
        };
        let results = shield.scan_messages(messages);
        if results.is_empty() {
            return Ok(());
        }
        self.metrics.increment(Counter::PiiDetections);

        if results.values().any(|r| r.should_block) {
            self.metrics.increment(Counter::PiiBlocks);
            tracing::warn!(messages = results.len(), "request blocked by PII shield");
            return Err(GatewayError::PiiBlocked);
        }

        match shield.action() {
            PiiAction::Redact => {
                for (index, result) in results {
                    if let Some(text) = result.processed_text {
                        let role = messages[index].role;
                        messages[index] = Message::new(role, text);
                    }
                }
            }
            PiiAction::Warn => {
                for (index, result) in results {
                    let kinds: Vec<&str> =
                        result.findings.iter().map(|f| f.kind.label()).collect();
                    tracing::warn!(message_index = index, kinds = ?kinds, "PII detected");
                }
            }
            PiiAction::Block => unreachable!("block results return above"),
        }
        Ok(())
    }

    fn scan_injection(&self, messages: &[Message]) -> Result<()> {
        let Some(detector) = &self.injection else {
            return Ok(());
        };
        let scan = detector.scan(messages);
        if scan.is_suspicious {
            self.metrics.increment(Counter::InjectionDetections);
        }
        if scan.action == InjectionAction::Block {
            self.metrics.increment(Counter::InjectionBlocks);
            return Err(GatewayError::InjectionBlocked {
                risk_score: scan.risk_score,
            });
        }
        Ok(())
    }

    /// Fire-and-forget judge dispatch. Runs on its own task so response
    /// delivery is never delayed; all judge failures are absorbed inside.
    fn schedule_judge(
        &self,
        request_id: Uuid,
        user_message: Option<String>,
        assistant_response: String,
    ) {
        let Some(judge) = self.judge.clone() else {
            return;
        };
        let Some(user_message) = user_message else {
            return;
        };
        let trace_id = crate::trace::current_trace_id();
        tokio::spawn(crate::trace::with_trace_id(trace_id, async move {
            let result = judge
                .evaluator
                .evaluate(&user_message, &assistant_response)
                .await;
            tracing::debug!(passed = result.passed(), "judge evaluation complete");
            if let Some(recorder) = &judge.recorder {
                recorder.record(request_id, &result).await;
            }
        }));
    }
}

pub struct PipelineBuilder {
    rate_limiter: Option<Arc<RateLimiter>>,
    pii_shield: Option<Arc<PiiShield>>,
    injection: Option<Arc<InjectionDetector>>,
    semantic_cache: Option<Arc<SemanticCache>>,
    exact_cache: Option<Arc<ExactCache>>,
    router: Arc<Router>,
    judge: Option<JudgeHandles>,
    metrics: Arc<MetricsCollector>,
}

impl PipelineBuilder {
    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn pii_shield(mut self, shield: Arc<PiiShield>) -> Self {
        self.pii_shield = Some(shield);
        self
    }

    pub fn injection_detector(mut self, detector: Arc<InjectionDetector>) -> Self {
        self.injection = Some(detector);
        self
    }

    pub fn semantic_cache(mut self, cache: Arc<SemanticCache>) -> Self {
        self.semantic_cache = Some(cache);
        self
    }

    pub fn exact_cache(mut self, cache: Arc<ExactCache>) -> Self {
        self.exact_cache = Some(cache);
        self
    }

    pub fn judge(mut self, evaluator: Arc<JudgeEvaluator>, recorder: Option<Arc<JudgeRecorder>>) -> Self {
        self.judge = Some(JudgeHandles {
            evaluator,
            recorder,
        });
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            rate_limiter: self.rate_limiter,
            pii_shield: self.pii_shield,
            injection: self.injection,
            semantic_cache: self.semantic_cache,
            exact_cache: self.exact_cache,
            router: self.router,
            judge: self.judge,
            metrics: self.metrics,
        }
    }
}
