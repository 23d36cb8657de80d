//! Application Ports (Driver and Driven)
//!
//! Ports define interfaces for interacting with external systems.
//! - **Driver Ports** (Primary/Inbound): channel lifecycle control
//! - **Driven Ports** (Secondary/Outbound): the subscription REST backend
//!   and the push-stream transport

mod backend_port;
mod channel_port;
mod transport_port;

#[cfg(test)]
pub use backend_port::MockSubscriptionBackend;
pub use backend_port::{RequestError, SubscriptionBackend};
#[cfg(test)]
pub use channel_port::MockChannelControl;
pub use channel_port::ChannelControl;
pub use transport_port::{
    DEFAULT_EVENT, EventStream, SseEvent, StreamRequest, StreamTransport, TransportError,
};
