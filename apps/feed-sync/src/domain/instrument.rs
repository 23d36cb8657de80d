//! Instrument Identity
//!
//! `InstrumentKey` is the sole join key across every per-instrument store.
//! Filters are ordered sets so two filters with the same members compare
//! equal regardless of the order the keys were added in.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Instrument Key
// =============================================================================

/// Opaque exchange-qualified instrument identifier (e.g. `NSE_FO|41880`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentKey(String);

impl InstrumentKey {
    /// Create a new instrument key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the raw key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstrumentKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for InstrumentKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for InstrumentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Instrument Filter
// =============================================================================

/// Set of instrument keys a push connection is restricted to.
pub type InstrumentFilter = BTreeSet<InstrumentKey>;

/// Encode a filter as the comma-separated `instruments` query value.
#[must_use]
pub fn filter_query_value(filter: &InstrumentFilter) -> String {
    filter
        .iter()
        .map(InstrumentKey::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_query_value_is_sorted_and_comma_joined() {
        let filter: InstrumentFilter = ["NSE_FO|2", "NSE_FO|1"]
            .into_iter()
            .map(InstrumentKey::from)
            .collect();
        assert_eq!(filter_query_value(&filter), "NSE_FO|1,NSE_FO|2");
    }

    #[test]
    fn key_serializes_as_plain_string() {
        let json = serde_json::to_string(&InstrumentKey::new("NSE_EQ|INE002A01018")).unwrap();
        assert_eq!(json, "\"NSE_EQ|INE002A01018\"");
    }
}
