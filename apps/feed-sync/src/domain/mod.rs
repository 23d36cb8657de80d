//! Domain Layer - Core feed types and the merge engine.
//!
//! This layer holds instrument identity, subscription intent, channel
//! lifecycle states and the pure reducer that folds partial fragments into
//! canonical records. Nothing here performs I/O.

/// Channel kinds, filter policies and connection states.
pub mod channel;

/// Instrument keys and stream filters.
pub mod instrument;

/// Feed merge engine and per-feed record schemas.
pub mod merge;

/// Subscription set and delivery mode.
pub mod subscription;
