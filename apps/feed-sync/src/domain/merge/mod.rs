//! Feed Merge Engine
//!
//! Folds partial server fragments into canonical per-key records.
//!
//! # Algorithm
//!
//! 1. Start from the previous record, or the record's default when the key
//!    has not been seen before.
//! 2. Overwrite every field present in the fragment. Absent fields keep their
//!    previous value: absent means "unchanged", never "cleared".
//! 3. Recompute derived fields from the post-overwrite base fields.
//! 4. Stamp the merge time as the observation time.
//!
//! [`merge`] is pure given its clock input, so re-merging the same fragment
//! over its own output is a fixed point.

use std::fmt::{Debug, Display};
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::channel::ChannelKind;

pub mod candle;
pub mod order;
pub mod quote;
pub mod vwap;
pub mod wire;

pub use candle::{BidAskSnapshot, Candle, CandleFeed, CandleFragment, Wall};
pub use order::{OrderFeed, OrderFragment, OrderId, OrderUpdate};
pub use quote::{LiveQuote, QuoteFeed, QuoteFragment};
pub use vwap::{Vwap, VwapFeed, VwapFragment};

// =============================================================================
// Overlay
// =============================================================================

/// Copy every `Some` field of a fragment onto the matching record field.
macro_rules! overlay {
    ($target:expr, $fragment:expr; $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = &$fragment.$field {
                $target.$field = value.clone();
            }
        )+
    };
}

pub(crate) use overlay;

// =============================================================================
// Traits
// =============================================================================

/// Accumulated view for one key within one feed.
pub trait CanonicalRecord: Debug + Clone + Default + PartialEq + Send + Sync + 'static {
    /// Partial update with every field optional.
    type Fragment: Debug + Clone + Send + Sync + 'static;

    /// Overwrite fields present in `fragment`.
    fn overlay(&mut self, fragment: &Self::Fragment);

    /// Recompute derived fields from base fields.
    fn recompute(&mut self);

    /// Record the merge time.
    fn stamp(&mut self, observed_at: DateTime<Utc>);
}

/// A push feed: its channel, key type, record schema and wire decoder.
pub trait Feed: Debug + Clone + Send + Sync + 'static {
    /// Channel carrying this feed.
    const KIND: ChannelKind;

    /// Join key for records of this feed.
    type Key: Debug + Display + Clone + Eq + Hash + Ord + Send + Sync + 'static;

    /// Canonical record type.
    type Record: CanonicalRecord;

    /// Decode one event payload into keyed fragments.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] when the payload is not the expected JSON.
    fn decode(data: &str) -> Result<Vec<Keyed<Self::Key, FragmentOf<Self>>>, DecodeError>;
}

/// Fragment type of a feed.
pub type FragmentOf<F> = <<F as Feed>::Record as CanonicalRecord>::Fragment;

/// A fragment tagged with the key it applies to.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyed<K, T> {
    /// Record key.
    pub key: K,
    /// Partial update.
    pub fragment: T,
}

impl<K, T> Keyed<K, T> {
    /// Pair a key with a fragment.
    pub const fn new(key: K, fragment: T) -> Self {
        Self { key, fragment }
    }
}

/// Merge a fragment into the previous record.
#[must_use]
pub fn merge<R: CanonicalRecord>(
    previous: Option<&R>,
    fragment: &R::Fragment,
    observed_at: DateTime<Utc>,
) -> R {
    let mut next = previous.cloned().unwrap_or_default();
    next.overlay(fragment);
    next.recompute();
    next.stamp(observed_at);
    next
}

// =============================================================================
// Derived Values
// =============================================================================

/// Absolute and percentage change between a reference and a latest value.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PriceChange {
    /// `latest - reference`.
    pub delta: f64,
    /// `delta / reference * 100`.
    pub percent: f64,
}

impl PriceChange {
    /// Compute the change, or zero when either side is unobserved.
    ///
    /// Never yields NaN or infinity.
    #[must_use]
    pub fn between(reference: f64, latest: f64) -> Self {
        if !is_observed(reference) || !is_observed(latest) {
            return Self::default();
        }

        let delta = latest - reference;
        let percent = delta / reference * 100.0;
        if !delta.is_finite() || !percent.is_finite() {
            return Self::default();
        }

        Self { delta, percent }
    }
}

fn is_observed(value: f64) -> bool {
    value.is_finite() && value.abs() > f64::EPSILON
}

/// Ratio of `part` to `whole` in percent, zero when `whole` is zero.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn guarded_percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

// =============================================================================
// Shared Sub-records
// =============================================================================

/// Option greeks.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Greeks {
    /// Sensitivity to the underlying.
    pub delta: f64,
    /// Time decay.
    pub theta: f64,
    /// Rate of change of delta.
    pub gamma: f64,
    /// Volatility sensitivity.
    pub vega: f64,
    /// Interest rate sensitivity.
    pub rho: f64,
}

/// Partial greeks update.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct GreeksFragment {
    /// Delta.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub delta: Option<f64>,
    /// Theta.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub theta: Option<f64>,
    /// Gamma.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub gamma: Option<f64>,
    /// Vega.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub vega: Option<f64>,
    /// Rho.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub rho: Option<f64>,
}

impl Greeks {
    /// Apply a partial greeks update.
    pub fn overlay(&mut self, fragment: &GreeksFragment) {
        overlay!(self, fragment; delta, theta, gamma, vega, rho);
    }
}

// =============================================================================
// Errors
// =============================================================================

/// A pushed payload could not be decoded.
///
/// Decode failures are never channel faults; the event is dropped.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Payload is not valid JSON for the feed schema.
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload lacks the field records are keyed by.
    #[error("payload has no {0}")]
    MissingKey(&'static str),
}
