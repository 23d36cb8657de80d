//! HTTP SSE Transport
//!
//! [`StreamTransport`] over a long-lived `GET /stream/<channel>` request.
//! The response body is decoded incrementally with [`SseCodec`]; the stream
//! yields one terminal error (body failure or [`TransportError::Ended`]) and
//! then finishes.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};

use super::codec::SseCodec;
use crate::application::ports::{
    EventStream, SseEvent, StreamRequest, StreamTransport, TransportError,
};
use crate::domain::channel::FilterPolicy;
use crate::domain::instrument::filter_query_value;

/// Query parameter carrying the instrument filter.
pub const INSTRUMENTS_PARAM: &str = "instruments";

/// SSE transport over reqwest.
#[derive(Debug, Clone)]
pub struct HttpSseTransport {
    client: reqwest::Client,
    api_root: String,
}

impl HttpSseTransport {
    /// Create a transport rooted at `api_root` (e.g. `http://localhost:8000/api/v1`).
    ///
    /// The client should not carry a total request timeout; streams are
    /// expected to stay open indefinitely.
    #[must_use]
    pub fn new(client: reqwest::Client, api_root: impl Into<String>) -> Self {
        Self {
            client,
            api_root: api_root.into().trim_end_matches('/').to_string(),
        }
    }

    /// Stream URL for a request, without the query string.
    #[must_use]
    pub fn stream_url(&self, request: &StreamRequest) -> String {
        format!("{}/stream/{}", self.api_root, request.kind.path())
    }

    /// The `instruments` query value to send, if any.
    #[must_use]
    pub fn filter_param(request: &StreamRequest) -> Option<String> {
        if request.kind.filter_policy() == FilterPolicy::Never {
            return None;
        }
        request
            .filter
            .as_ref()
            .filter(|filter| !filter.is_empty())
            .map(filter_query_value)
    }
}

#[async_trait]
impl StreamTransport for HttpSseTransport {
    async fn connect(&self, request: &StreamRequest) -> Result<EventStream, TransportError> {
        let url = self.stream_url(request);
        let mut builder = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");

        let filter = Self::filter_param(request);
        if let Some(value) = &filter {
            builder = builder.query(&[(INSTRUMENTS_PARAM, value.as_str())]);
        }

        tracing::debug!(
            channel = %request.kind,
            url = %url,
            filtered = filter.is_some(),
            "Opening SSE stream"
        );

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        Ok(sse_events(response.bytes_stream()))
    }
}

// =============================================================================
// Body Decoding
// =============================================================================

struct DecodeState<E> {
    body: Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>,
    codec: SseCodec,
    pending: VecDeque<SseEvent>,
    finished: bool,
}

/// Turn a byte stream into SSE events, ending with one terminal error.
pub fn sse_events<S, E>(body: S) -> EventStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        codec: SseCodec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }

            let failure = match state.body.next().await {
                Some(Ok(chunk)) => match state.codec.decode(&chunk) {
                    Ok(events) => {
                        state.pending.extend(events);
                        continue;
                    }
                    Err(e) => TransportError::Body(e.to_string()),
                },
                Some(Err(e)) => TransportError::Body(e.to_string()),
                None => TransportError::Ended,
            };
            state.finished = true;
            return Some((Err(failure), state));
        }
    })
    .boxed()
}
