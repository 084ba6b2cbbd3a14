//! # SSE Decoder
//!
//! Incremental Server-Sent Events decoder for the client transport.
//! Handles:
//! - Line buffering across arbitrary chunk boundaries
//! - `\n` and `\r\n` line endings
//! - `event:` names and multi-line `data:` payloads
//! - Comment lines (`: keepalive`), surfaced separately so they never reach
//!   application handlers

use bytes::BytesMut;
use tracing::{trace, warn};

/// One dispatched SSE message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseMessage {
    /// A data-carrying message with its optional `event:` name
    Event { event: Option<String>, data: String },
    /// A comment-only block, e.g. an idle keepalive
    Comment(String),
}

impl SseMessage {
    pub fn is_keepalive(&self) -> bool {
        matches!(self, SseMessage::Comment(_))
    }
}

/// Stateful decoder fed with raw body chunks
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    event: Option<String>,
    data: Vec<String>,
    comment: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            ..Self::default()
        }
    }

    /// Feed a chunk and collect every message it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line = self.buffer.split_to(newline_pos + 1);
            line.truncate(newline_pos);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }

            let Ok(text) = std::str::from_utf8(&line) else {
                warn!(len = line.len(), "skipping non UTF-8 SSE line");
                continue;
            };

            if let Some(message) = self.process_line(text) {
                messages.push(message);
            }
        }
        messages
    }

    fn process_line(&mut self, line: &str) -> Option<SseMessage> {
        if line.is_empty() {
            return self.dispatch();
        }

        if let Some(comment) = line.strip_prefix(':') {
            self.comment = Some(comment.trim_start().to_string());
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" | "retry" => {}
            other => trace!(field = other, "ignoring unknown SSE field"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        let event = self.event.take();
        let comment = self.comment.take();

        if self.data.is_empty() {
            // An event name without data dispatches nothing
            return comment.map(SseMessage::Comment);
        }

        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseMessage::Event { event, data })
    }
}
