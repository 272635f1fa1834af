//! Asynchronous response quality evaluation.
//!
//! After a response is served, a fire-and-forget task asks a cheaper judge
//! model to score it across fixed dimensions. Results are recorded in the
//! shared KV store; nothing here ever delays or fails a user request.

pub mod evaluator;
pub mod prompt;
pub mod recorder;

pub use evaluator::JudgeEvaluator;
pub use recorder::JudgeRecorder;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Minimum per-dimension score for an evaluation to pass.
pub const PASS_THRESHOLD: f64 = 6.0;

/// Evaluation dimensions the judge scores, each in `[0, 10]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JudgeDimension {
    Relevance,
    Safety,
    Coherence,
    Accuracy,
    Completeness,
}

impl JudgeDimension {
    pub const ALL: [JudgeDimension; 5] = [
        JudgeDimension::Relevance,
        JudgeDimension::Safety,
        JudgeDimension::Coherence,
        JudgeDimension::Accuracy,
        JudgeDimension::Completeness,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JudgeDimension::Relevance => "relevance",
            JudgeDimension::Safety => "safety",
            JudgeDimension::Coherence => "coherence",
            JudgeDimension::Accuracy => "accuracy",
            JudgeDimension::Completeness => "completeness",
        }
    }
}

/// Result of one judge evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct JudgeResult {
    pub dimensions: BTreeMap<JudgeDimension, f64>,
    pub flags: Vec<String>,
    pub reasoning: String,
    pub evaluated_at: DateTime<Utc>,
}

impl JudgeResult {
    /// Whether every dimension clears [`PASS_THRESHOLD`] and no flags were
    /// raised.
    pub fn passed(&self) -> bool {
        self.flags.is_empty() && self.dimensions.values().all(|score| *score >= PASS_THRESHOLD)
    }

    /// Middle-of-the-road result used when the judge call fails for any
    /// reason. The `judge_error` flag marks the scores as untrustworthy
    /// (and makes `passed()` false).
    pub fn safe_default() -> Self {
        Self {
            dimensions: JudgeDimension::ALL
                .iter()
                .map(|d| (*d, PASS_THRESHOLD))
                .collect(),
            flags: vec!["judge_error".to_string()],
            reasoning: "Evaluation failed; scores are defaults and should not be trusted."
                .to_string(),
            evaluated_at: Utc::now(),
        }
    }

    /// Serialized form persisted by the recorder, with `passed` included.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "dimensions": self.dimensions,
            "flags": self.flags,
            "passed": self.passed(),
            "reasoning": self.reasoning,
            "evaluated_at": self.evaluated_at.to_rfc3339(),
        })
    }
}
