//! Stream Transport Port (Driven Port)
//!
//! Opens one server-push connection for a channel and yields its events
//! until the connection ends.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domain::channel::ChannelKind;
use crate::domain::instrument::InstrumentFilter;

/// Default SSE event name for events without an `event:` field.
pub const DEFAULT_EVENT: &str = "message";

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name; `message` when the server sent none.
    pub event: String,
    /// Payload, multi-line data joined with `\n`.
    pub data: String,
    /// Last event id, if any.
    pub id: Option<String>,
}

impl SseEvent {
    /// Unnamed event with the given payload.
    #[must_use]
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            event: DEFAULT_EVENT.to_string(),
            data: data.into(),
            id: None,
        }
    }

    /// Named event with the given payload.
    #[must_use]
    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            id: None,
        }
    }
}

/// What to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// Channel kind; selects the stream path.
    pub kind: ChannelKind,
    /// Instrument filter; `None` or empty omits the query parameter.
    pub filter: Option<InstrumentFilter>,
}

/// Live event stream of one connection.
pub type EventStream = BoxStream<'static, Result<SseEvent, TransportError>>;

/// Connection failed or dropped.
///
/// Always recovered by the channel's reconnect loop; never surfaced as a
/// hard failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Could not reach the server.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Server refused the stream.
    #[error("stream rejected with HTTP {0}")]
    Status(u16),

    /// Error while reading the body.
    #[error("stream read failed: {0}")]
    Body(String),

    /// Server closed the stream.
    #[error("stream ended")]
    Ended,
}

impl TransportError {
    /// Short label for metrics.
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Status(_) => "status",
            Self::Body(_) => "body",
            Self::Ended => "ended",
        }
    }
}

/// Port for opening push connections.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Perform the handshake and return the event stream.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the handshake fails.
    async fn connect(&self, request: &StreamRequest) -> Result<EventStream, TransportError>;
}
