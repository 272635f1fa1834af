//! PII shield.
//!
//! Wraps an opaque analyzer ([`PiiDetector`]) and applies the configured
//! policy: block the request, redact the spans, or pass with a warning.
//! The built-in [`RegexPiiDetector`] covers structured identifiers; a
//! linguistic analyzer can be swapped in behind the same trait.

use crate::domain::{Message, PiiEntity, PiiType};
use regex::Regex;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// What to do when PII is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiiAction {
    /// Reject the request outright.
    Block,
    /// Replace each span with an uppercase `[TYPE]` marker.
    Redact,
    /// Leave content untouched; report findings in logs.
    Warn,
}

impl FromStr for PiiAction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "block" => Ok(PiiAction::Block),
            "redact" => Ok(PiiAction::Redact),
            "warn" => Ok(PiiAction::Warn),
            other => Err(format!("unknown PII action: {:?}", other)),
        }
    }
}

/// Result of running the shield over one text.
#[derive(Debug, Clone)]
pub struct PiiResult {
    pub action: PiiAction,
    pub findings: Vec<PiiEntity>,
    /// Redacted text; populated only in redact mode.
    pub processed_text: Option<String>,
    pub should_block: bool,
}

/// Opaque PII analyzer: text in, entity spans out.
pub trait PiiDetector: Send + Sync {
    /// Detect PII spans in one text. Empty text yields no findings.
    fn detect(&self, text: &str) -> Vec<PiiEntity>;

    /// Detect across a message list. Only indices with findings appear in
    /// the result.
    fn detect_in_messages(&self, messages: &[Message]) -> HashMap<usize, Vec<PiiEntity>> {
        let mut out = HashMap::new();
        for (index, message) in messages.iter().enumerate() {
            if message.content.trim().is_empty() {
                continue;
            }
            let findings = self.detect(&message.content);
            if !findings.is_empty() {
                out.insert(index, findings);
            }
        }
        out
    }
}

/// Pattern-based analyzer for structured identifiers.
pub struct RegexPiiDetector {
    patterns: Vec<(PiiType, Regex, f64)>,
}

impl Default for RegexPiiDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl RegexPiiDetector {
    pub fn new() -> Self {
        let compile = |pattern: &str| Regex::new(pattern).expect("invalid built-in PII pattern");
        Self {
            patterns: vec![
                (
                    PiiType::Email,
                    compile(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"),
                    0.95,
                ),
                (
                    PiiType::Ssn,
                    compile(r"\b\d{3}-\d{2}-\d{4}\b"),
                    0.9,
                ),
                (
                    PiiType::CreditCard,
                    compile(r"\b\d{4}[ -]\d{4}[ -]\d{4}[ -]\d{4}\b"),
                    0.85,
                ),
                (
                    PiiType::Phone,
                    compile(r"(?:\+?\d{1,2}[-. ]?)?\(?\d{3}\)?[-. ]\d{3}[-. ]\d{4}\b"),
                    0.7,
                ),
                (
                    PiiType::IpAddress,
                    compile(r"\b(?:\d{1,3}\.){3}\d{1,3}\b"),
                    0.8,
                ),
            ],
        }
    }
}

impl PiiDetector for RegexPiiDetector {
    fn detect(&self, text: &str) -> Vec<PiiEntity> {
        if text.is_empty() {
            return Vec::new();
        }
        let mut findings = Vec::new();
        for (kind, pattern, confidence) in &self.patterns {
            for found in pattern.find_iter(text) {
                findings.push(PiiEntity {
                    kind: *kind,
                    text: found.as_str().to_string(),
                    start: found.start(),
                    end: found.end(),
                    confidence: *confidence,
                });
            }
        }
        findings.sort_by_key(|f| f.start);
        findings
    }
}

/// Applies the configured [`PiiAction`] to detector findings.
pub struct PiiShield {
    action: PiiAction,
    detector: Arc<dyn PiiDetector>,
}

impl PiiShield {
    pub fn new(action: PiiAction, detector: Arc<dyn PiiDetector>) -> Self {
        Self { action, detector }
    }

    pub fn action(&self) -> PiiAction {
        self.action
    }

    /// Scan one text.
    pub fn scan_text(&self, text: &str) -> PiiResult {
        let findings = self.detector.detect(text);
        self.result_for(text, findings)
    }

    /// Scan a message list. Only message indices with findings appear in the
    /// result; redaction never changes message order or roles.
    pub fn scan_messages(&self, messages: &[Message]) -> HashMap<usize, PiiResult> {
        let mut out = HashMap::new();
        for (index, findings) in self.detector.detect_in_messages(messages) {
            out.insert(index, self.result_for(&messages[index].content, findings));
        }
        out
    }

    fn result_for(&self, text: &str, findings: Vec<PiiEntity>) -> PiiResult {
        if findings.is_empty() {
            return PiiResult {
                action: self.action,
                findings,
                processed_text: None,
                should_block: false,
            };
        }
        let should_block = self.action == PiiAction::Block;
        let processed_text = if self.action == PiiAction::Redact {
            Some(redact_text(text, &findings))
        } else {
            None
        };
        PiiResult {
            action: self.action,
            findings,
            processed_text,
            should_block,
        }
    }
}

/// Replace each finding span with its `[TYPE]` marker. Overlapping spans
/// keep the widest; rewrites run right-to-left so earlier offsets stay
/// valid.
fn redact_text(text: &str, findings: &[PiiEntity]) -> String {
    let mut by_width: Vec<&PiiEntity> = findings.iter().collect();
    by_width.sort_by(|a, b| {
        (b.end - b.start)
            .cmp(&(a.end - a.start))
            .then(a.start.cmp(&b.start))
    });

    let mut kept: Vec<&PiiEntity> = Vec::new();
    for finding in by_width {
        let overlaps = kept
            .iter()
            .any(|k| finding.start < k.end && k.start < finding.end);
        if !overlaps {
            kept.push(finding);
        }
    }
    kept.sort_by(|a, b| b.start.cmp(&a.start));

    let mut out = text.to_string();
    for finding in kept {
        out.replace_range(finding.start..finding.end, &format!("[{}]", finding.kind.label()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;

    fn shield(action: PiiAction) -> PiiShield {
        PiiShield::new(action, Arc::new(RegexPiiDetector::new()))
    }

    #[test]
    fn test_empty_text_no_findings() {
        let result = shield(PiiAction::Redact).scan_text("");
        assert!(result.findings.is_empty());
        assert!(!result.should_block);
        assert!(result.processed_text.is_none());
    }

    #[test]
    fn test_clean_text_no_findings() {
        let result = shield(PiiAction::Block).scan_text("what is the weather today");
        assert!(result.findings.is_empty());
        assert!(!result.should_block);
    }

    #[test]
    fn test_block_mode_blocks_on_any_finding() {
        let result = shield(PiiAction::Block).scan_text("mail me at jane@example.com");
        assert!(result.should_block);
        assert_eq!(result.findings[0].kind, PiiType::Email);
        assert!(result.processed_text.is_none());
    }

    #[test]
    fn test_redact_email() {
        let result = shield(PiiAction::Redact).scan_text("mail me at jane@example.com please");
        assert_eq!(
            result.processed_text.as_deref(),
            Some("mail me at [EMAIL] please")
        );
        assert!(!result.should_block);
    }

    #[test]
    fn test_redact_multiple_spans_right_to_left() {
        let result = shield(PiiAction::Redact)
            .scan_text("ssn 123-45-6789 and email a@b.co and ip 10.0.0.1");
        let processed = result.processed_text.unwrap();
        assert_eq!(processed, "ssn [SSN] and email [EMAIL] and ip [IP_ADDRESS]");
    }

    #[test]
    fn test_warn_mode_leaves_text_untouched() {
        let result = shield(PiiAction::Warn).scan_text("call +1 555-867-5309 now");
        assert!(!result.findings.is_empty());
        assert!(result.processed_text.is_none());
        assert!(!result.should_block);
    }

    #[test]
    fn test_scan_messages_only_flagged_indices() {
        let messages = vec![
            Message::new(Role::System, "be terse"),
            Message::new(Role::User, "my ssn is 123-45-6789"),
            Message::new(Role::User, "nothing sensitive here"),
        ];
        let results = shield(PiiAction::Redact).scan_messages(&messages);
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[&1].processed_text.as_deref(),
            Some("my ssn is [SSN]")
        );
    }

    #[test]
    fn test_redact_credit_card() {
        let result = shield(PiiAction::Redact).scan_text("card 4111-1111-1111-1111 on file");
        assert_eq!(
            result.processed_text.as_deref(),
            Some("card [CREDIT_CARD] on file")
        );
    }

    /// Reports one wide and one narrow finding over the same region.
    struct OverlapDetector;

    impl PiiDetector for OverlapDetector {
        fn detect(&self, text: &str) -> Vec<PiiEntity> {
            let wide = "4111-1111-1111-1111";
            let start = text.find(wide).unwrap();
            vec![
                PiiEntity {
                    kind: PiiType::Phone,
                    text: text[start..start + 4].to_string(),
                    start,
                    end: start + 4,
                    confidence: 0.7,
                },
                PiiEntity {
                    kind: PiiType::CreditCard,
                    text: wide.to_string(),
                    start,
                    end: start + wide.len(),
                    confidence: 0.85,
                },
            ]
        }
    }

    #[test]
    fn test_overlapping_spans_use_widest() {
        let shield = PiiShield::new(PiiAction::Redact, Arc::new(OverlapDetector));
        let result = shield.scan_text("card 4111-1111-1111-1111 on file");
        assert_eq!(
            result.processed_text.as_deref(),
            Some("card [CREDIT_CARD] on file")
        );
    }

    #[test]
    fn test_pii_action_from_str() {
        assert_eq!("redact".parse::<PiiAction>().unwrap(), PiiAction::Redact);
        assert_eq!("BLOCK".parse::<PiiAction>().unwrap(), PiiAction::Block);
        assert_eq!("warn".parse::<PiiAction>().unwrap(), PiiAction::Warn);
        assert!("shrug".parse::<PiiAction>().is_err());
    }
}
