//! Channel Kinds and Connection States
//!
//! Each logical feed kind owns at most one live push connection. The kind
//! determines the stream path, the SSE event name carrying payloads, and
//! whether the connection accepts an instrument filter.

use std::fmt;

use serde::Serialize;

/// Logical category of push stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Live quotes (LTP, OHLC, depth).
    LiveQuote,
    /// Completed 1-minute candles.
    Candle,
    /// Running VWAP per instrument.
    Vwap,
    /// Order lifecycle updates.
    OrderUpdate,
}

impl ChannelKind {
    /// All channel kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::LiveQuote, Self::Candle, Self::Vwap, Self::OrderUpdate]
    }

    /// Path segment under `/stream/`.
    #[must_use]
    pub const fn path(&self) -> &'static str {
        match self {
            Self::LiveQuote => "live",
            Self::Candle => "candles",
            Self::Vwap => "vwap",
            Self::OrderUpdate => "orders",
        }
    }

    /// SSE event name carrying payloads for this channel.
    ///
    /// Unnamed events are delivered under the default `message` name.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::LiveQuote | Self::Vwap => "message",
            Self::Candle => "candle",
            Self::OrderUpdate => "order",
        }
    }

    /// How this channel treats instrument filters.
    #[must_use]
    pub const fn filter_policy(&self) -> FilterPolicy {
        match self {
            Self::LiveQuote => FilterPolicy::Required,
            Self::Candle | Self::Vwap => FilterPolicy::Optional,
            Self::OrderUpdate => FilterPolicy::Never,
        }
    }

    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LiveQuote => "live_quote",
            Self::Candle => "candle",
            Self::Vwap => "vwap",
            Self::OrderUpdate => "order_update",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter handling per channel kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPolicy {
    /// At least one instrument is needed; an empty filter closes the channel.
    Required,
    /// Empty filter means "server default" and omits the query parameter.
    Optional,
    /// The channel never sends a filter.
    Never,
}

/// Lifecycle state of a stream channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection attempted yet.
    #[default]
    Idle,
    /// Handshake in flight.
    Connecting,
    /// Receiving events.
    Open,
    /// Error observed, retry scheduled.
    Degraded,
    /// Torn down by the caller; no automatic retry.
    Closed,
}

impl ConnectionState {
    /// Whether the UI should show the channel as live.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Numeric encoding for gauges.
    #[must_use]
    pub const fn as_gauge(&self) -> f64 {
        match self {
            Self::Idle => 0.0,
            Self::Connecting => 1.0,
            Self::Open => 2.0,
            Self::Degraded => 3.0,
            Self::Closed => 4.0,
        }
    }

    /// Stable label for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Degraded => "degraded",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_paths() {
        assert_eq!(ChannelKind::LiveQuote.path(), "live");
        assert_eq!(ChannelKind::Candle.path(), "candles");
        assert_eq!(ChannelKind::Vwap.path(), "vwap");
        assert_eq!(ChannelKind::OrderUpdate.path(), "orders");
    }

    #[test]
    fn named_events_only_for_candles_and_orders() {
        assert_eq!(ChannelKind::Candle.event_name(), "candle");
        assert_eq!(ChannelKind::OrderUpdate.event_name(), "order");
        assert_eq!(ChannelKind::LiveQuote.event_name(), "message");
        assert_eq!(ChannelKind::Vwap.event_name(), "message");
    }

    #[test]
    fn order_updates_never_filter() {
        assert_eq!(ChannelKind::OrderUpdate.filter_policy(), FilterPolicy::Never);
        assert_eq!(ChannelKind::LiveQuote.filter_policy(), FilterPolicy::Required);
    }

    #[test]
    fn default_state_is_idle() {
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
        assert!(!ConnectionState::Degraded.is_live());
        assert!(ConnectionState::Open.is_live());
    }

    #[test]
    fn all_returns_four_kinds() {
        assert_eq!(ChannelKind::all().len(), 4);
    }
}
