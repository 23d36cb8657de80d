//! SSE Wire Codec
//!
//! Incremental decoder for the `text/event-stream` format. Body chunks may
//! split lines, fields or UTF-8 sequences anywhere; the decoder buffers
//! partial lines and emits an event on each blank line.
//!
//! # Format
//!
//! ```text
//! : keep-alive
//!
//! event: candle
//! data: {"instrument_key": "NSE_FO|41880", ...}
//!
//! data: {"type": "live_feed", ...}
//!
//! ```
//!
//! - Lines end in `\n`, `\r\n` or `\r`
//! - Lines starting with `:` are comments
//! - `data` lines accumulate, joined with `\n`
//! - Events without an `event` field are named `message`
//! - A blank line with no accumulated data dispatches nothing

use bytes::{Buf, BytesMut};

use crate::application::ports::{DEFAULT_EVENT, SseEvent};

/// Longest accepted line, in bytes.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SseCodecError {
    /// A line exceeded the configured limit without a terminator.
    #[error("SSE line exceeds {limit} bytes")]
    LineTooLong {
        /// Configured limit.
        limit: usize,
    },
}

/// Incremental `text/event-stream` decoder.
#[derive(Debug)]
pub struct SseCodec {
    buffer: BytesMut,
    max_line_bytes: usize,
    skip_lf: bool,
    at_stream_start: bool,
    event: Option<String>,
    data: String,
    has_data: bool,
    last_event_id: Option<String>,
    retry_hint_ms: Option<u64>,
}

impl Default for SseCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl SseCodec {
    /// Create a decoder with the default line limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }

    /// Create a decoder with a custom line limit.
    #[must_use]
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_line_bytes,
            skip_lf: false,
            at_stream_start: true,
            event: None,
            data: String::new(),
            has_data: false,
            last_event_id: None,
            retry_hint_ms: None,
        }
    }

    /// Feed a body chunk and collect every event it completes.
    ///
    /// # Errors
    ///
    /// Returns [`SseCodecError::LineTooLong`] when an unterminated line grows
    /// past the limit.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, SseCodecError> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        loop {
            if self.skip_lf && !self.buffer.is_empty() {
                if self.buffer[0] == b'\n' {
                    self.buffer.advance(1);
                }
                self.skip_lf = false;
            }

            let Some(end) = self.buffer.iter().position(|b| *b == b'\n' || *b == b'\r') else {
                break;
            };

            let line = self.buffer.split_to(end);
            let terminator = self.buffer[0];
            self.buffer.advance(1);
            if terminator == b'\r' {
                self.skip_lf = true;
            }

            let text = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&text) {
                events.push(event);
            }
        }

        if self.buffer.len() > self.max_line_bytes {
            return Err(SseCodecError::LineTooLong {
                limit: self.max_line_bytes,
            });
        }

        Ok(events)
    }

    /// Last `id` field seen.
    #[must_use]
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Last `retry` hint seen, in milliseconds.
    ///
    /// Recorded for diagnostics only; reconnect timing is owned by the
    /// channel's policy.
    #[must_use]
    pub const fn retry_hint_ms(&self) -> Option<u64> {
        self.retry_hint_ms
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = if self.at_stream_start {
            self.at_stream_start = false;
            line.strip_prefix('\u{feff}').unwrap_or(line)
        } else {
            line
        };

        if line.is_empty() {
            return self.dispatch();
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "id" if !value.contains('\0') => self.last_event_id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse() {
                    self.retry_hint_ms = Some(ms);
                }
            }
            _ => {}
        }

        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if !self.has_data {
            return None;
        }

        self.has_data = false;
        Some(SseEvent {
            event: event
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data: std::mem::take(&mut self.data),
            id: self.last_event_id.clone(),
        })
    }
}
