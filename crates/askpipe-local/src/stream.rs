//! Incremental normalizers for the two line-oriented chat wire formats.
//!
//! Both share the same buffering discipline: bytes accumulate until a full
//! `\n`-terminated line exists; the trailing fragment is held back, so a
//! line split across chunk boundaries parses identically to one arriving
//! whole. A malformed line never aborts the stream — it is skipped and the
//! next line is processed.

use askpipe_core::{Error, Result};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

/// Byte buffer that yields complete lines and holds back the incomplete
/// trailing fragment.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every complete line it closes.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
        }
        lines
    }
}

#[derive(Debug, Deserialize)]
struct DeltaEvent {
    #[serde(rename = "type")]
    kind: Option<String>,
    delta: Option<String>,
}

/// Normalizer for the newline-delimited JSON event protocol (Brave).
///
/// Only `text_delta` events contribute text; their `delta` field defaults
/// to the empty string when absent.
#[derive(Debug, Default)]
pub struct DeltaJsonAccumulator {
    lines: LineBuffer,
    text: String,
}

impl DeltaJsonAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) {
        for line in self.lines.push_chunk(chunk) {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(event) = serde_json::from_str::<DeltaEvent>(trimmed) else {
                continue;
            };
            if event.kind.as_deref() == Some("text_delta") {
                self.text.push_str(event.delta.as_deref().unwrap_or(""));
            }
        }
    }

    /// Accumulated text at end-of-stream (possibly empty, never an error).
    pub fn finish(self) -> String {
        self.text
    }
}

#[derive(Debug, Deserialize)]
struct SseEnvelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    data: Option<SseAnswerData>,
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SseAnswerData {
    text: Option<String>,
}

/// Final outcome of an SSE-style answer stream.
#[derive(Debug, Clone)]
pub struct SseOutcome {
    pub text: String,
    pub session_id: Option<String>,
}

/// Normalizer for the SSE-style protocol (Felo).
///
/// Each `answer` event carries the *cumulative* text so far; the delta is
/// the suffix beyond the previously seen length, so no suffix is ever
/// emitted twice even when upstream resends the whole text per event.
#[derive(Debug, Default)]
pub struct CumulativeSseAccumulator {
    lines: LineBuffer,
    seen: String,
    session_id: Option<String>,
    answer_events: usize,
}

impl CumulativeSseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the deltas this chunk produced, in order.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut deltas = Vec::new();
        for line in self.lines.push_chunk(chunk) {
            let Some(rest) = line.strip_prefix("data:") else {
                continue;
            };
            let Ok(envelope) = serde_json::from_str::<SseEnvelope>(rest.trim()) else {
                continue;
            };
            if let Some(sid) = envelope.session_id.filter(|s| !s.is_empty()) {
                self.session_id = Some(sid);
            }
            if envelope.kind.as_deref() != Some("answer") {
                continue;
            }
            let Some(text) = envelope.data.and_then(|d| d.text) else {
                continue;
            };
            self.answer_events += 1;
            if text.len() > self.seen.len() {
                if let Some(suffix) = text.get(self.seen.len()..) {
                    deltas.push(suffix.to_string());
                    self.seen = text;
                }
            }
        }
        deltas
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// End-of-stream: a stream that produced zero answer events is an
    /// empty-response error, not an empty string.
    pub fn finish(self) -> Result<SseOutcome> {
        if self.answer_events == 0 {
            return Err(Error::Protocol(
                "stream ended without any answer events".to_string(),
            ));
        }
        Ok(SseOutcome {
            text: tidy_answer(&self.seen),
            session_id: self.session_id,
        })
    }
}

static BLANK_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("valid literal pattern"));

/// Strip the bold-markup artifact and collapse runs of blank lines.
pub fn tidy_answer(text: &str) -> String {
    let cleaned = text.replace("**", "");
    BLANK_RUN.replace_all(&cleaned, "\n\n").trim().to_string()
}
