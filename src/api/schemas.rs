//! Wire schemas for the chat-completion surface.

use crate::domain::Role;
use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};

fn default_temperature() -> f64 {
    1.0
}

/// Request body of `POST /v1/chat/completions`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<MessageSchema>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub stream: bool,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    pub stop: Option<Vec<String>>,
}

impl ChatCompletionRequest {
    /// Semantic validation beyond what serde enforces structurally.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("model must not be empty".to_string()));
        }
        if self.messages.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "messages must not be empty".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(GatewayError::InvalidRequest(format!(
                "temperature must be in [0, 2], got {}",
                self.temperature
            )));
        }
        if let Some(top_p) = self.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                return Err(GatewayError::InvalidRequest(format!(
                    "top_p must be in [0, 1], got {}",
                    top_p
                )));
            }
        }
        Ok(())
    }
}

/// One wire message. `Role` is a closed enum, so unknown roles fail
/// deserialization at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSchema {
    pub role: Role,
    pub content: String,
}

/// Response body of a non-streaming completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    /// Unix seconds.
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChoiceSchema>,
    pub usage: UsageSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceSchema {
    pub index: u32,
    pub message: ChoiceMessageSchema,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceMessageSchema {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSchema {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One SSE content frame: `{"choices":[{"delta":{"content": ...}}]}`.
pub fn stream_chunk(content: &str) -> serde_json::Value {
    serde_json::json!({"choices": [{"delta": {"content": content}}]})
}

/// Final SSE frame emitted on a mid-stream failure.
pub fn stream_error(message: &str, kind: &str) -> serde_json::Value {
    serde_json::json!({"error": {"message": message, "type": kind}})
}
