//! Prompt-injection detector.
//!
//! Static weighted-pattern scanner over user-role content only. Rules
//! compile once at construction; per-request work is a handful of regex
//! searches over the concatenated user text. Fails open: anything that
//! cannot be scanned yields a clean pass result.

use crate::domain::{Message, Role};
use regex::Regex;

/// Possible outcomes of an injection scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionAction {
    Block,
    Warn,
    Pass,
}

/// A single detection rule: compiled pattern plus risk weight in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub pattern: Regex,
    pub weight: f64,
}

impl Rule {
    pub fn new(name: impl Into<String>, pattern: &str, weight: f64) -> crate::error::Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| crate::error::GatewayError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            pattern,
            weight: weight.clamp(0.0, 1.0),
        })
    }
}

/// Result of scanning a message list.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    pub is_suspicious: bool,
    /// Combined risk score in `[0, 1]`, rounded to 4 decimals.
    pub risk_score: f64,
    pub matched_rules: Vec<String>,
    pub action: InjectionAction,
}

impl ScanResult {
    /// A clean no-threat result: no user text, no matches, or scan failure.
    pub fn safe() -> Self {
        Self {
            is_suspicious: false,
            risk_score: 0.0,
            matched_rules: Vec::new(),
            action: InjectionAction::Pass,
        }
    }
}

fn builtin(name: &str, pattern: &str, weight: f64) -> Rule {
    Rule {
        name: name.to_string(),
        pattern: Regex::new(pattern).expect("invalid built-in injection pattern"),
        weight,
    }
}

/// The default rule set, covering the common attack families.
pub fn default_rules() -> Vec<Rule> {
    vec![
        // Direct instruction override. Very specific phrase, highest risk.
        builtin(
            "ignore_instructions",
            r"(?i)ignore\s+(all\s+)?(previous|prior|above|earlier)\s+(instructions|prompts|rules|context)",
            0.95,
        ),
        // Role reassignment, common in jailbreak preambles.
        builtin(
            "role_override",
            r"(?i)you\s+are\s+now\s+(a|an|the|my)\s+\w+|act\s+as\s+(a|an|the|if)\s+\w+|pretend\s+(you\s+are|to\s+be)\s+",
            0.7,
        ),
        // Attempts to leak the system prompt.
        builtin(
            "system_prompt_leak",
            r"(?i)(reveal|show|print|display|repeat|output|tell\s+me|what\s+is|what\s+are)\s+(me\s+)?(your|the)\s+(system\s*)?(prompt|instructions|rules|context|message)",
            0.9,
        ),
        // Well-known jailbreak names.
        builtin(
            "jailbreak_dan",
            r"\bDAN\b|(?i)do\s+anything\s+now|jailbreak|bypass\s+(filter|safety|restriction)",
            0.95,
        ),
        // Faked system/assistant delimiters.
        builtin(
            "delimiter_injection",
            r"(?i)<\|?(system|assistant|im_start|im_end)\|?>|\[INST\]|\[/INST\]|###\s*(system|assistant|instruction)",
            0.85,
        ),
        // Payload hidden behind an encoding.
        builtin(
            "encoding_evasion",
            r"(?i)base64\s*(decode|encode)|rot13|translate\s+from\s+(hex|binary|morse|base64)",
            0.8,
        ),
        // Same intent as ignore_instructions, different verbs.
        builtin(
            "forget_instructions",
            r"(?i)(forget|disregard|dismiss|override|reset)\s+(everything|all|your|the|any)\s+(previous|prior|above|earlier|original)?\s*(instructions|rules|context|prompts)?",
            0.9,
        ),
        // Replacing the system prompt with "real" instructions.
        builtin(
            "new_instructions",
            r"(?i)(new|updated|real|actual|true)\s+(instructions|rules|prompt|task)\s*(:|are|follow)",
            0.85,
        ),
    ]
}

/// Scans user messages for injection attempts.
///
/// Created once at startup; `scan` runs per request. Only user-role
/// messages are inspected, concatenated with single spaces so attacks
/// split across messages are still caught.
pub struct InjectionDetector {
    block_threshold: f64,
    warn_threshold: f64,
    rules: Vec<Rule>,
}

impl InjectionDetector {
    pub fn new(block_threshold: f64, warn_threshold: f64) -> Self {
        Self {
            block_threshold,
            warn_threshold,
            rules: default_rules(),
        }
    }

    pub fn with_rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = rules;
        self
    }

    /// Scan a message list for injection attempts.
    pub fn scan(&self, messages: &[Message]) -> ScanResult {
        let user_texts: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::User && !m.content.is_empty())
            .map(|m| m.content.as_str())
            .collect();

        if user_texts.is_empty() {
            return ScanResult::safe();
        }

        let combined = user_texts.join(" ");
        let matched: Vec<&Rule> = self
            .rules
            .iter()
            .filter(|rule| rule.pattern.is_match(&combined))
            .collect();

        if matched.is_empty() {
            return ScanResult::safe();
        }

        let weights: Vec<f64> = matched.iter().map(|rule| rule.weight).collect();
        let names: Vec<String> = matched.iter().map(|rule| rule.name.clone()).collect();
        let score = combine_scores(&weights);
        let action = self.action_for(score);

        tracing::warn!(
            score,
            ?action,
            rules = ?names,
            "prompt injection detected"
        );

        ScanResult {
            is_suspicious: true,
            risk_score: score,
            matched_rules: names,
            action,
        }
    }

    fn action_for(&self, score: f64) -> InjectionAction {
        if score >= self.block_threshold {
            InjectionAction::Block
        } else if score >= self.warn_threshold {
            InjectionAction::Warn
        } else {
            InjectionAction::Pass
        }
    }
}

impl std::fmt::Debug for InjectionDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InjectionDetector")
            .field("block_threshold", &self.block_threshold)
            .field("warn_threshold", &self.warn_threshold)
            .field("rules", &self.rules.len())
            .finish()
    }
}

/// Combine rule weights into one `[0, 1]` risk score via the complement
/// product `1 - prod(1 - w)`, rounded to 4 decimals. A single match of
/// weight `w` scores exactly `w`; an empty set scores 0.
fn combine_scores(weights: &[f64]) -> f64 {
    if weights.is_empty() {
        return 0.0;
    }
    let survival: f64 = weights.iter().map(|w| 1.0 - w).product();
    ((1.0 - survival) * 10_000.0).round() / 10_000.0
}
