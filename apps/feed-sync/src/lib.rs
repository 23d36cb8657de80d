#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_precision_loss
    )
)]

//! Feed Sync - Real-time Market Data Synchronization Layer
//!
//! Keeps long-lived server-push connections (live quotes, candles, VWAP,
//! order updates) in step with a local subscription set, and folds the
//! partial payloads they deliver into canonical per-instrument records.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and the merge engine
//!   - `instrument`: Instrument keys and filters
//!   - `subscription`: Subscription set and delivery mode
//!   - `channel`: Channel kinds and connection states
//!   - `merge`: Fragment schemas, canonical records, the `merge` reducer
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Backend REST, push transport, channel control
//!   - `services`: Registry, synchronizer, canonical and history stores
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `sse`: Event-stream codec and reqwest transport
//!   - `stream`: Channel lifecycle and reconnect policy
//!   - `backend`: REST client
//!   - `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! subscribe ──► Registry ──► Synchronizer ──► StreamChannel ──SSE──┐
//!                  │                                               ▼
//!                  └──► Backend REST              Store ◄── merge(fragment)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types and the merge engine, no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Composition root.
pub mod session;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::channel::{ChannelKind, ConnectionState, FilterPolicy};
pub use domain::instrument::{InstrumentFilter, InstrumentKey};
pub use domain::merge::{
    Candle, CandleFeed, CanonicalRecord, Feed, LiveQuote, OrderFeed, OrderId, OrderUpdate,
    QuoteFeed, Vwap, VwapFeed, merge,
};
pub use domain::subscription::{DeliveryMode, SubscriptionSet};

// Application services
pub use application::ports::{RequestError, TransportError};
pub use application::services::{
    CanonicalStore, HistoricalCandle, HistoryStore, StoreUpdate, SubscriptionRegistry,
    Synchronizer,
};

// Infrastructure
pub use infrastructure::backend::{BackendClient, HistoryQuery};
pub use infrastructure::config::{ConfigError, SyncConfig};
pub use infrastructure::stream::StreamChannel;

// Session
pub use session::{FeedSync, SessionError};
