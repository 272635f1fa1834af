//! Adapter for the Anthropic Messages API.
//!
//! Endpoint: `{base_url}/messages`. Anthropic takes the system prompt as a
//! top-level field rather than a message, requires `max_tokens`, and names
//! its finish reasons differently; all of that is normalized here. The API
//! version header is configuration, not a constant.

use super::sse::{SseDecoder, SseFrame};
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

const PROVIDER_NAME: &str = "anthropic";

/// Anthropic requires an explicit completion budget.
const DEFAULT_MAX_TOKENS: u32 = 1024;

fn default_models() -> Vec<String> {
    vec![
        "claude-sonnet-4-20250514".to_string(),
        "claude-haiku-4-20250514".to_string(),
    ]
}

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    api_version: String,
    models: Vec<String>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("api_key", &"***")
            .field("models", &self.models)
            .finish()
    }
}

impl AnthropicProvider {
    pub fn new(
        client: Client,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        api_version: impl Into<String>,
        breaker: CircuitBreaker,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
            api_version: api_version.into(),
            models: default_models(),
            breaker,
            retry,
        }
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    /// Split system messages out of the conversation; Anthropic wants them
    /// as one top-level `system` string.
    fn prepare_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
        let mut system_parts = Vec::new();
        let mut conversation = Vec::new();
        for message in messages {
            if message.role == Role::System {
                system_parts.push(message.content.as_str());
            } else {
                conversation.push(json!({"role": message.role, "content": message.content}));
            }
        }
        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n"))
        };
        (system, conversation)
    }

    fn build_payload(request: &ChatRequest, stream: bool) -> Value {
        let (system, conversation) = Self::prepare_messages(&request.messages);
        let mut payload = json!({
            "model": request.model,
            "messages": conversation,
            "max_tokens": request.parameters.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        payload["temperature"] = json!(request.parameters.temperature);
        if let Some(top_p) = request.parameters.top_p {
            payload["top_p"] = json!(top_p);
        }
        if let Some(stop) = &request.parameters.stop {
            payload["stop_sequences"] = json!(stop);
        }
        if let Some(system) = system {
            payload["system"] = json!(system);
        }
        if stream {
            payload["stream"] = json!(true);
        }
        payload
    }

    fn map_stop_reason(stop_reason: &str) -> FinishReason {
        match stop_reason {
            "end_turn" | "stop_sequence" => FinishReason::Stop,
            "max_tokens" => FinishReason::Length,
            _ => FinishReason::Error,
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/messages", self.base_url.trim_end_matches('/'))
    }

    async fn send_checked(&self, payload: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .header("content-type", "application/json")
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

        let content = data["content"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let finish_reason = data["stop_reason"]
            .as_str()
            .map(Self::map_stop_reason)
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
                prompt_tokens: data["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
                completion_tokens: data["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
                provider: PROVIDER_NAME.to_string(),
                model,
            },
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            created_at: Utc::now(),
        })
    }
}

#[async_trait]
impl StreamBackend for AnthropicProvider {
    async fn open_stream(&self, request: &ChatRequest, probe: &mut StreamProbe<'_>) -> Result<()> {
        let payload = Self::build_payload(request, true);
        let response = self.send_checked(&payload).await?;

        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for frame in decoder.feed(&chunk) {
                let SseFrame::Data(value) = frame else {
                    continue;
                };
                match value["type"].as_str() {
                    Some("content_block_delta") => {
                        if let Some(text) = value["delta"]["text"].as_str() {
                            if !text.is_empty() && !probe.push(text.to_string()) {
                                return Ok(());
                            }
                        }
                    }
                    Some("message_stop") => return Ok(()),
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn models(&self) -> Vec<String> {
        self.models.clone()
    }

    async fn health_check(&self) -> Result<bool> {
        // Minimal one-token probe; Anthropic has no cheap list endpoint.
        let payload = json!({
            "model": self.models.last(),
            "max_tokens": 1,
            "messages": [{"role": "user", "content": "hi"}],
        });
        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .header("content-type", "application/json")
            .json(&payload)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ModelParameters;

    fn request() -> ChatRequest {
        ChatRequest::new(
            "claude-sonnet-4-20250514",
            vec![
                Message::new(Role::System, "Be terse."),
                Message::new(Role::System, "Answer in English."),
                Message::new(Role::User, "hello"),
                Message::new(Role::Assistant, "hi"),
                Message::new(Role::User, "bye"),
            ],
            ModelParameters::default(),
        )
    }

    #[test]
    fn test_system_messages_extracted_and_joined() {
        let (system, conversation) = AnthropicProvider::prepare_messages(&request().messages);
        assert_eq!(system.as_deref(), Some("Be terse.\nAnswer in English."));
        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation[0]["role"], "user");
        assert_eq!(conversation[1]["role"], "assistant");
    }

    #[test]
    fn test_no_system_messages() {
        let messages = vec![Message::new(Role::User, "hello")];
        let (system, conversation) = AnthropicProvider::prepare_messages(&messages);
        assert!(system.is_none());
        assert_eq!(conversation.len(), 1);
    }

    #[test]
    fn test_payload_shape() {
        let payload = AnthropicProvider::build_payload(&request(), false);
        assert_eq!(payload["model"], "claude-sonnet-4-20250514");
        assert_eq!(payload["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(payload["system"], "Be terse.\nAnswer in English.");
        assert!(payload.get("stream").is_none());
        assert!(payload.get("stop_sequences").is_none());
    }

    #[test]
    fn test_payload_stop_sequences_and_stream() {
        let mut req = request();
        req.parameters.stop = Some(vec!["END".to_string()]);
        req.parameters.max_tokens = Some(64);
        let payload = AnthropicProvider::build_payload(&req, true);
        assert_eq!(payload["stop_sequences"][0], "END");
        assert_eq!(payload["max_tokens"], 64);
        assert_eq!(payload["stream"], true);
    }

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(
            AnthropicProvider::map_stop_reason("end_turn"),
            FinishReason::Stop
        );
        assert_eq!(
            AnthropicProvider::map_stop_reason("stop_sequence"),
            FinishReason::Stop
        );
        assert_eq!(
            AnthropicProvider::map_stop_reason("max_tokens"),
            FinishReason::Length
        );
        assert_eq!(
            AnthropicProvider::map_stop_reason("refusal"),
            FinishReason::Error
        );
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let provider = AnthropicProvider::new(
            Client::new(),
            "sk-ant-secret",
            "https://api.anthropic.com/v1",
            "2023-06-01",
            CircuitBreaker::new(3, std::time::Duration::from_secs(30)),
            RetryPolicy::default(),
        );
        let debug = format!("{:?}", provider);
        assert!(!debug.contains("sk-ant-secret"));
        assert!(debug.contains("2023-06-01"));
    }
}
