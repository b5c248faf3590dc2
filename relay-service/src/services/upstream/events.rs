//! Event-stream framing and decoding.
//!
//! The upstream body is a sequence of lines:
//!
//! ```text
//! event: content_block_delta
//! data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}
//!
//! ```
//!
//! `LineBuffer` reassembles lines across network chunks and
//! `EventStreamDecoder` maps each `data:` line to a `StreamEvent` according
//! to the most recent `event:` tag.

use crate::services::error::DecodeError;
use serde_json::Value;

const KNOWN_EVENTS: [&str; 7] = [
    "message_start",
    "content_block_start",
    "ping",
    "content_block_delta",
    "content_block_stop",
    "message_delta",
    "message_stop",
];

/// One decoded upstream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    MessageStart,
    ContentBlockStart,
    Ping,
    /// `None` when the payload carried no `delta.text` string.
    ContentBlockDelta(Option<String>),
    ContentBlockStop,
    MessageDelta,
    /// The only successful end of a stream.
    MessageStop,
    Unknown(String),
}

impl StreamEvent {
    /// Classify a `data:` payload by the event tag it was sent under.
    pub fn from_block(event: &str, payload: &Value) -> Self {
        match event {
            "message_start" => StreamEvent::MessageStart,
            "content_block_start" => StreamEvent::ContentBlockStart,
            "ping" => StreamEvent::Ping,
            "content_block_delta" => StreamEvent::ContentBlockDelta(
                payload
                    .pointer("/delta/text")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            ),
            "content_block_stop" => StreamEvent::ContentBlockStop,
            "message_delta" => StreamEvent::MessageDelta,
            "message_stop" => StreamEvent::MessageStop,
            other => StreamEvent::Unknown(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            StreamEvent::MessageStart => "message_start",
            StreamEvent::ContentBlockStart => "content_block_start",
            StreamEvent::Ping => "ping",
            StreamEvent::ContentBlockDelta(_) => "content_block_delta",
            StreamEvent::ContentBlockStop => "content_block_stop",
            StreamEvent::MessageDelta => "message_delta",
            StreamEvent::MessageStop => "message_stop",
            StreamEvent::Unknown(name) => name,
        }
    }
}

/// Stateful line decoder. Remembers the current `event:` tag.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    current_event: String,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one line (without its terminator).
    ///
    /// Returns `Ok(None)` for `event:` lines, blank lines, comments and
    /// anything else that is not a `data:` line. A `data:` line under a
    /// recognized tag that is not valid JSON fails the stream.
    pub fn decode_line(&mut self, line: &str) -> Result<Option<StreamEvent>, DecodeError> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if let Some(event) = field_value(line, "event") {
            self.current_event = event.to_string();
            return Ok(None);
        }

        let Some(data) = field_value(line, "data") else {
            return Ok(None);
        };

        // Payloads under unrecognized tags are never parsed.
        if !KNOWN_EVENTS.contains(&self.current_event.as_str()) {
            return Ok(Some(StreamEvent::Unknown(self.current_event.clone())));
        }

        let payload: Value = serde_json::from_str(data).map_err(|e| {
            DecodeError::Protocol(format!(
                "invalid JSON in {} payload: {}",
                self.current_event, e
            ))
        })?;

        Ok(Some(StreamEvent::from_block(&self.current_event, &payload)))
    }
}

/// `event: x` / `event:x` → `x`.
fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Splits a chunked byte stream into `\n`-terminated lines.
///
/// Works on bytes so a multi-byte character split across chunks is
/// reassembled before UTF-8 decoding.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, DecodeError> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            lines.push(into_utf8(line)?);
        }
        Ok(lines)
    }

    /// The unterminated tail left when the body ends, if any.
    pub fn finish(&mut self) -> Result<Option<String>, DecodeError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        into_utf8(std::mem::take(&mut self.pending)).map(Some)
    }
}

fn into_utf8(bytes: Vec<u8>) -> Result<String, DecodeError> {
    String::from_utf8(bytes)
        .map_err(|e| DecodeError::Protocol(format!("invalid UTF-8 in upstream stream: {}", e)))
}
