//! Adapter for OpenAI-compatible chat-completion APIs.
//!
//! Endpoint: `{base_url}/chat/completions`. Streaming uses SSE with
//! `data: {"choices":[{"delta":{"content":"token"}}]}` frames terminated by
//! `data: [DONE]`.

use super::sse::{delta_content, SseDecoder, SseFrame};
use super::{
    classify_status, execute_guarded, parse_retry_after, run_guarded_stream, ChunkSink, Provider,
    StreamBackend, StreamOutcome, StreamProbe,
};
use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::domain::{ChatRequest, ChatResponse, FinishReason, Message, Role, TokenUsage};
use crate::error::Result;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use chrono::Utc;
use futures::{FutureExt, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Instant;

const PROVIDER_NAME: &str = "openai";

/// Models served by default when none are configured explicitly.
fn default_models() -> Vec<String> {
    vec![
        "gpt-4".to_string(),
        "gpt-4o".to_string(),
        "gpt-4o-mini".to_string(),
    ]
}

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    models: Vec<String>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let key = if self.api_key.len() > 6 {
            format!("{}***", &self.api_key[..6])
        } else {
            "***".to_string()
        };
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &key)
            .field("models", &self.models)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(
        client: Client,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        breaker: CircuitBreaker,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
            models: default_models(),
            breaker,
            retry,
        }
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    fn build_payload(request: &ChatRequest, stream: bool) -> Value {
        let mut payload = json!({
            "model": request.model,
            "messages": request
                .messages
                .iter()
                .map(|m| json!({"role": m.role, "content": m.content}))
                .collect::<Vec<_>>(),
            "temperature": request.parameters.temperature,
            "stream": stream,
        });
        if let Some(max_tokens) = request.parameters.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = request.parameters.top_p {
            payload["top_p"] = json!(top_p);
        }
        if let Some(stop) = &request.parameters.stop {
            payload["stop"] = json!(stop);
        }
        payload
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Send a request and classify any non-success status.
    async fn send_checked(&self, payload: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(
            PROVIDER_NAME,
            status.as_u16(),
            body,
            retry_after,
        ))
    }

    async fn do_completion(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let start = Instant::now();
        let payload = Self::build_payload(request, false);
        let response = self.send_checked(&payload).await?;
        let data: Value = response.json().await?;

        let choice = &data["choices"][0];
        let content = choice["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let finish_reason = choice["finish_reason"]
            .as_str()
            .map(FinishReason::from_wire)
            .unwrap_or(FinishReason::Error);
        let model = data["model"]
            .as_str()
            .unwrap_or(&request.model)
            .to_string();

        Ok(ChatResponse {
            request_id: request.id,
            message: Message::new(Role::Assistant, content),
            model: model.clone(),
            provider: PROVIDER_NAME.to_string(),
            finish_reason,
            usage: TokenUsage {
                prompt_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                completion_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0)
                    as u32,
                provider: PROVIDER_NAME.to_string(),
                model,
            },
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            created_at: Utc::now(),
        })
    }
}

#[async_trait]
impl StreamBackend for OpenAiProvider {
    async fn open_stream(&self, request: &ChatRequest, probe: &mut StreamProbe<'_>) -> Result<()> {
        let payload = Self::build_payload(request, true);
        let response = self.send_checked(&payload).await?;

        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for frame in decoder.feed(&chunk) {
                match frame {
                    SseFrame::Done => return Ok(()),
                    SseFrame::Data(value) => {
                        if let Some(content) = delta_content(&value) {
                            if !content.is_empty() && !probe.push(content.to_string()) {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
        for frame in decoder.flush() {
            if let SseFrame::Data(value) = frame {
                if let Some(content) = delta_content(&value) {
                    if !content.is_empty() && !probe.push(content.to_string()) {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn models(&self) -> Vec<String> {
        self.models.clone()
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/models", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        execute_guarded(PROVIDER_NAME, &self.breaker, &self.retry, || {
            self.do_completion(request).boxed()
        })
        .await
    }

    async fn stream(&self, request: &ChatRequest, sink: ChunkSink<'_>) -> Result<StreamOutcome> {
        run_guarded_stream(PROVIDER_NAME, &self.breaker, &self.retry, self, request, sink).await
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
