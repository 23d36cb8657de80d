//! Server-Sent Events Adapter
//!
//! - `codec`: incremental `text/event-stream` decoder
//! - `transport`: reqwest-backed [`StreamTransport`](crate::application::ports::StreamTransport)

pub mod codec;
pub mod transport;

pub use codec::{SseCodec, SseCodecError};
pub use transport::{HttpSseTransport, INSTRUMENTS_PARAM, sse_events};
