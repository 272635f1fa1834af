//! Provider-agnostic domain types.
//!
//! These represent the internal truth of the system, independent of any
//! vendor wire format. API-layer schemas convert into and out of these types
//! at the edges (see [`crate::api::convert`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Message roles in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// End-user input.
    User,
    /// Assistant (model) output.
    Assistant,
    /// Tool output fed back into the conversation.
    Tool,
}

impl Role {
    /// Wire form of the role (`"system"`, `"user"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Why the model stopped generating.
///
/// Unknown upstream values are mapped to [`FinishReason::Error`] at the
/// adapter boundary rather than leaking vendor-specific strings inward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of turn or a stop sequence.
    Stop,
    /// The max token budget was exhausted.
    Length,
    /// The provider's own content filter truncated the output.
    ContentFilter,
    /// Anything else, including unknown vendor values.
    Error,
}

impl FinishReason {
    /// Map a vendor finish-reason string to the internal enum.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Error,
        }
    }

    /// Wire form of the finish reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::Error => "error",
        }
    }
}

/// A single message. Never mutated; stages that alter content (redaction)
/// produce new values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message author.
    pub role: Role,
    /// The message content.
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    /// Sampling temperature in `[0, 2]`.
    pub temperature: f64,
    /// Completion token budget.
    pub max_tokens: Option<u32>,
    /// Nucleus sampling parameter.
    pub top_p: Option<f64>,
    /// Stop sequences.
    pub stop: Option<Vec<String>>,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            max_tokens: None,
            top_p: None,
            stop: None,
        }
    }
}

/// Internal representation of a chat request.
///
/// Created at ingress, destroyed after the response is sent. The pipeline
/// exclusively owns per-request state; `messages` is never empty after
/// ingress validation.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Unique request id, assigned at creation.
    pub id: Uuid,
    /// Requested model identifier.
    pub model: String,
    /// Ordered conversation messages.
    pub messages: Vec<Message>,
    /// Generation parameters.
    pub parameters: ModelParameters,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Free-form request metadata.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>, parameters: ModelParameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            model: model.into(),
            messages,
            parameters,
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Content of the most recent user message, if any. This is the text
    /// the semantic cache keys on.
    pub fn last_user_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Token consumption for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Provider that produced the completion.
    pub provider: String,
    /// Model that produced the completion.
    pub model: String,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Internal representation of a chat response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Id of the request this response answers.
    pub request_id: Uuid,
    /// The assistant message.
    pub message: Message,
    /// Model that actually served the request.
    pub model: String,
    /// Provider that actually served the request.
    pub provider: String,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
    /// Upstream call latency in milliseconds.
    pub latency_ms: f64,
    pub created_at: DateTime<Utc>,
}

/// Kinds of PII the shield recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiType {
    Email,
    Phone,
    Ssn,
    CreditCard,
    Name,
    Address,
    IpAddress,
    Other,
}

impl PiiType {
    /// Uppercase redaction marker, e.g. `EMAIL` for `[EMAIL]`.
    pub fn label(&self) -> &'static str {
        match self {
            PiiType::Email => "EMAIL",
            PiiType::Phone => "PHONE",
            PiiType::Ssn => "SSN",
            PiiType::CreditCard => "CREDIT_CARD",
            PiiType::Name => "NAME",
            PiiType::Address => "ADDRESS",
            PiiType::IpAddress => "IP_ADDRESS",
            PiiType::Other => "OTHER",
        }
    }
}

/// A detected PII span in text. Offsets are byte positions into the scanned
/// text, `start..end` exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiiEntity {
    pub kind: PiiType,
    /// The matched text.
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::from_str::<Role>("\"assistant\"").unwrap(),
            Role::Assistant
        );
    }

    #[test]
    fn test_unknown_role_rejected() {
        assert!(serde_json::from_str::<Role>("\"overlord\"").is_err());
    }

    #[test]
    fn test_finish_reason_from_wire_unknown_is_error() {
        assert_eq!(FinishReason::from_wire("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire("length"), FinishReason::Length);
        assert_eq!(
            FinishReason::from_wire("content_filter"),
            FinishReason::ContentFilter
        );
        assert_eq!(FinishReason::from_wire("tool_calls"), FinishReason::Error);
        assert_eq!(FinishReason::from_wire(""), FinishReason::Error);
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            prompt_tokens: 12,
            completion_tokens: 30,
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
        };
        assert_eq!(usage.total_tokens(), 42);
    }

    #[test]
    fn test_last_user_content_picks_most_recent() {
        let request = ChatRequest::new(
            "gpt-4o-mini",
            vec![
                Message::new(Role::System, "be terse"),
                Message::new(Role::User, "first"),
                Message::new(Role::Assistant, "ok"),
                Message::new(Role::User, "second"),
            ],
            ModelParameters::default(),
        );
        assert_eq!(request.last_user_content(), Some("second"));
    }

    #[test]
    fn test_last_user_content_none_without_user_messages() {
        let request = ChatRequest::new(
            "gpt-4o-mini",
            vec![Message::new(Role::System, "be terse")],
            ModelParameters::default(),
        );
        assert_eq!(request.last_user_content(), None);
    }
}
