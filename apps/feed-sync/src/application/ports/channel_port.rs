//! Channel Control Port (Driver Port)
//!
//! The lifecycle surface of a stream channel, as seen by the synchronizer
//! and the UI.

use crate::domain::channel::{ChannelKind, ConnectionState};
use crate::domain::instrument::InstrumentFilter;

/// Open and close one channel.
#[cfg_attr(test, mockall::automock)]
pub trait ChannelControl: Send + Sync {
    /// Channel kind.
    fn kind(&self) -> ChannelKind;

    /// Tear down any live connection and connect with `filter`.
    fn open(&self, filter: Option<InstrumentFilter>);

    /// Tear down the connection and cancel any pending reconnect.
    fn close(&self);

    /// Current connection state.
    fn state(&self) -> ConnectionState;
}
