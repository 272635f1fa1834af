//! API to domain mapping.
//!
//! Small pure functions keeping the wire schemas and domain types separate.

use super::schemas::{
    ChatCompletionRequest, ChatCompletionResponse, ChoiceMessageSchema, ChoiceSchema, UsageSchema,
};
use crate::domain::{ChatRequest, ChatResponse, Message, ModelParameters};
use uuid::Uuid;

/// Convert an inbound API request into a domain [`ChatRequest`]. A fresh
/// request id and timestamp are assigned here.
pub fn to_domain_chat_request(api: &ChatCompletionRequest) -> ChatRequest {
    let messages = api
        .messages
        .iter()
        .map(|m| Message::new(m.role, m.content.clone()))
        .collect();
    let parameters = ModelParameters {
        temperature: api.temperature,
        max_tokens: api.max_tokens,
        top_p: api.top_p,
        stop: api.stop.clone(),
    };
    ChatRequest::new(api.model.clone(), messages, parameters)
}

/// Convert a domain [`ChatResponse`] to the wire shape.
pub fn to_api_response(response: &ChatResponse) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: response.request_id.to_string(),
        object: "chat.completion".to_string(),
        created: response.created_at.timestamp(),
        model: response.model.clone(),
        choices: vec![ChoiceSchema {
            index: 0,
            message: ChoiceMessageSchema {
                role: "assistant".to_string(),
                content: response.message.content.clone(),
            },
            finish_reason: response.finish_reason.as_str().to_string(),
        }],
        usage: UsageSchema {
            prompt_tokens: response.usage.prompt_tokens,
            completion_tokens: response.usage.completion_tokens,
            total_tokens: response.usage.total_tokens(),
        },
    }
}

/// Build a wire response for a semantic-cache hit, which has no upstream
/// usage to report.
pub fn semantic_hit_response(
    request_id: Uuid,
    model: &str,
    content: &str,
) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: request_id.to_string(),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![ChoiceSchema {
            index: 0,
            message: ChoiceMessageSchema {
                role: "assistant".to_string(),
                content: content.to_string(),
            },
            finish_reason: "stop".to_string(),
        }],
        usage: UsageSchema {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FinishReason, Role, TokenUsage};
    use chrono::Utc;

    #[test]
    fn test_request_conversion_preserves_order_and_parameters() {
        let api: ChatCompletionRequest = serde_json::from_str(
            r#"{
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "system", "content": "be terse"},
                    {"role": "user", "content": "ping"}
                ],
                "temperature": 0.2,
                "max_tokens": 64,
                "stop": ["END"]
            }"#,
        )
        .unwrap();
        let domain = to_domain_chat_request(&api);
        assert_eq!(domain.model, "gpt-4o-mini");
        assert_eq!(domain.messages.len(), 2);
        assert_eq!(domain.messages[0].role, Role::System);
        assert_eq!(domain.messages[1].content, "ping");
        assert_eq!(domain.parameters.temperature, 0.2);
        assert_eq!(domain.parameters.max_tokens, Some(64));
        assert_eq!(domain.parameters.stop.as_deref(), Some(&["END".to_string()][..]));
    }

    #[test]
    fn test_response_conversion() {
        let request_id = Uuid::new_v4();
        let response = ChatResponse {
            request_id,
            message: Message::new(Role::Assistant, "pong"),
            model: "gpt-4o-mini".to_string(),
            provider: "openai".to_string(),
            finish_reason: FinishReason::Stop,
            usage: TokenUsage {
                prompt_tokens: 3,
                completion_tokens: 5,
                provider: "openai".to_string(),
                model: "gpt-4o-mini".to_string(),
            },
            latency_ms: 12.0,
            created_at: Utc::now(),
        };
        let api = to_api_response(&response);
        assert_eq!(api.id, request_id.to_string());
        assert_eq!(api.object, "chat.completion");
        assert_eq!(api.choices[0].message.content, "pong");
        assert_eq!(api.choices[0].finish_reason, "stop");
        assert_eq!(api.usage.total_tokens, 8);
    }

    #[test]
    fn test_semantic_hit_response_shape() {
        let id = Uuid::new_v4();
        let api = semantic_hit_response(id, "gpt-4o-mini", "Paris.");
        assert_eq!(api.id, id.to_string());
        assert_eq!(api.choices[0].message.content, "Paris.");
        assert_eq!(api.usage.total_tokens, 0);
    }
}
