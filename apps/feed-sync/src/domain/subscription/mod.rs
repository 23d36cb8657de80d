//! Subscription Intent
//!
//! The local record of which instruments the UI wants pushed, and at what
//! detail level. Change detection is by set content, so adding the same key
//! twice or re-adding keys in a different order is not a change.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::instrument::{InstrumentFilter, InstrumentKey};

// =============================================================================
// Delivery Mode
// =============================================================================

/// Detail level requested from the backend for subscribed instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Full market depth, OHLC and greeks.
    #[default]
    Full,
    /// Full detail with 30-level depth.
    FullD30,
    /// Last traded price and close only.
    Ltpc,
}

impl DeliveryMode {
    /// Parse a mode name, falling back to [`DeliveryMode::Full`].
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "ltpc" => Self::Ltpc,
            "full_d30" => Self::FullD30,
            _ => Self::Full,
        }
    }

    /// Wire name of the mode.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::FullD30 => "full_d30",
            Self::Ltpc => "ltpc",
        }
    }
}

// =============================================================================
// Subscription Set
// =============================================================================

/// The local record of which instruments the UI wants pushed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    keys: InstrumentFilter,
    mode: DeliveryMode,
}

impl SubscriptionSet {
    /// Create an empty set with the given delivery mode.
    #[must_use]
    pub const fn new(mode: DeliveryMode) -> Self {
        Self {
            keys: BTreeSet::new(),
            mode,
        }
    }

    /// Insert keys and record the delivery mode.
    ///
    /// Returns `true` if the set changed.
    pub fn insert_all(&mut self, keys: &[InstrumentKey], mode: DeliveryMode) -> bool {
        let mut changed = self.mode != mode;
        self.mode = mode;
        for key in keys {
            changed |= self.keys.insert(key.clone());
        }
        changed
    }

    /// Remove keys. Returns `true` if the set changed.
    pub fn remove_all(&mut self, keys: &[InstrumentKey]) -> bool {
        let mut changed = false;
        for key in keys {
            changed |= self.keys.remove(key);
        }
        changed
    }

    /// Replace the key set wholesale. Returns `true` if the content changed.
    pub fn replace(&mut self, keys: impl IntoIterator<Item = InstrumentKey>) -> bool {
        let next: InstrumentFilter = keys.into_iter().collect();
        if next == self.keys {
            return false;
        }
        self.keys = next;
        true
    }

    /// Current delivery mode.
    #[must_use]
    pub const fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Whether a key is present.
    #[must_use]
    pub fn contains(&self, key: &InstrumentKey) -> bool {
        self.keys.contains(key)
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The keys as a stream filter.
    #[must_use]
    pub const fn filter(&self) -> &InstrumentFilter {
        &self.keys
    }

    /// Keys in ascending order.
    #[must_use]
    pub fn keys(&self) -> Vec<InstrumentKey> {
        self.keys.iter().cloned().collect()
    }
}
