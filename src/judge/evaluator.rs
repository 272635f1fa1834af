//! Judge evaluator.
//!
//! Sends the exchange to a judge model (routed like any other request, so
//! it benefits from the breaker and fallback machinery) and parses the
//! scored JSON. Never raises to the caller: any failure yields
//! [`JudgeResult::safe_default`].

use super::prompt::{build_user_prompt, JUDGE_SYSTEM_PROMPT};
use super::{JudgeDimension, JudgeResult};
use crate::domain::{ChatRequest, Message, ModelParameters, Role};
use crate::error::{GatewayError, Result};
use crate::provider::Router;
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct JudgeEvaluator {
    router: Arc<Router>,
    model: String,
}

impl JudgeEvaluator {
    pub fn new(router: Arc<Router>, model: impl Into<String>) -> Self {
        Self {
            router,
            model: model.into(),
        }
    }

    /// Score an assistant response. Never fails; a broken judge call
    /// degrades to the safe default.
    pub async fn evaluate(&self, user_message: &str, assistant_response: &str) -> JudgeResult {
        match self.try_evaluate(user_message, assistant_response).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(error = %err, "judge evaluation failed, using safe default");
                JudgeResult::safe_default()
            }
        }
    }

    async fn try_evaluate(&self, user_message: &str, assistant_response: &str) -> Result<JudgeResult> {
        let request = ChatRequest::new(
            self.model.clone(),
            vec![
                Message::new(Role::System, JUDGE_SYSTEM_PROMPT),
                Message::new(Role::User, build_user_prompt(user_message, assistant_response)),
            ],
            ModelParameters {
                temperature: 0.0,
                ..Default::default()
            },
        );
        let response = self.router.route(&request).await?;
        parse_judge_response(&response.message.content)
    }
}

/// Parse the judge model's JSON into a [`JudgeResult`], enforcing the
/// contract: every dimension present and in `[0, 10]`, `flags` a list
/// (values stringified), `reasoning` a string.
pub(crate) fn parse_judge_response(raw: &str) -> Result<JudgeResult> {
    let data: Value = serde_json::from_str(raw)?;

    let mut dimensions = BTreeMap::new();
    for dimension in JudgeDimension::ALL {
        let score = data
            .get(dimension.as_str())
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                GatewayError::Other(format!(
                    "judge response missing numeric score for '{}'",
                    dimension.as_str()
                ))
            })?;
        if !(0.0..=10.0).contains(&score) {
            return Err(GatewayError::Other(format!(
                "judge score for '{}' out of range: {}",
                dimension.as_str(),
                score
            )));
        }
        dimensions.insert(dimension, score);
    }

    let flags = match data.get("flags") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(values)) => values
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(other) => {
            return Err(GatewayError::Other(format!(
                "judge response 'flags' is not a list: {}",
                other
            )))
        }
    };

    let reasoning = data
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(JudgeResult {
        dimensions,
        flags,
        reasoning,
        evaluated_at: Utc::now(),
    })
}
