//! Server-sent-event stream decoder.
//!
//! Handles the `data: ` prefix, the `[DONE]` terminator, line buffering
//! across TCP chunk boundaries, `event:` lines, and empty keep-alive lines.
//! Malformed data frames are skipped rather than aborting the stream.

use serde_json::Value;

/// One decoded SSE frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    /// A parsed `data: {json}` payload.
    Data(Value),
    /// The `data: [DONE]` terminator.
    Done,
}

/// Incremental SSE decoder.
///
/// # Example
///
/// ```
/// use llm_gateway::provider::sse::{SseDecoder, SseFrame};
///
/// let mut decoder = SseDecoder::new();
/// let frames = decoder.feed(b"data: {\"x\":1}\n\ndata: [DONE]\n\n");
/// assert_eq!(frames.len(), 2);
/// assert_eq!(frames[1], SseFrame::Done);
/// ```
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every complete frame now available.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(frame) = Self::parse_line(line.trim()) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Drain any trailing unterminated line after the transport closes.
    pub fn flush(&mut self) -> Vec<SseFrame> {
        let remaining = std::mem::take(&mut self.buffer);
        remaining
            .lines()
            .filter_map(|line| Self::parse_line(line.trim()))
            .collect()
    }

    fn parse_line(line: &str) -> Option<SseFrame> {
        if line.is_empty() || line.starts_with("event:") || line.starts_with(':') {
            return None;
        }
        let data = line
            .strip_prefix("data: ")
            .or_else(|| line.strip_prefix("data:"))?
            .trim();
        if data == "[DONE]" {
            return Some(SseFrame::Done);
        }
        // Malformed frames are dropped; transport errors are handled by the
        // adapter, not here.
        serde_json::from_str::<Value>(data).ok().map(SseFrame::Data)
    }
}

/// Content delta of an OpenAI-style streaming chunk, if present.
pub fn delta_content(value: &Value) -> Option<&str> {
    value["choices"][0]["delta"]["content"].as_str()
}
