//! Stream Channels
//!
//! - `channel`: generation-guarded push connection lifecycle per feed
//! - `reconnect`: flat, unbounded reconnect timing

pub mod channel;
pub mod reconnect;

pub use channel::StreamChannel;
pub use reconnect::{DEFAULT_RECONNECT_DELAY, ReconnectConfig, ReconnectPolicy};
