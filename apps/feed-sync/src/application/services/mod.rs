//! Application Services
//!
//! - `registry`: local subscription intent mirrored to the backend
//! - `synchronizer`: subscription set to channel filter reconciliation
//! - `store`: canonical per-feed record stores
//! - `history`: request/response candle history

pub mod history;
pub mod registry;
pub mod store;
pub mod synchronizer;

pub use history::{HistoricalCandle, HistoryStore};
pub use registry::SubscriptionRegistry;
pub use store::{CanonicalStore, DEFAULT_UPDATES_CAPACITY, SharedStore, StoreUpdate};
pub use synchronizer::{ReconcileOutcome, Synchronizer};
