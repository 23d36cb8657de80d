//! Historical Candle Store
//!
//! Request/response history, kept apart from the live canonical stores.
//! Each fetch fully replaces the candles for its (instrument, interval);
//! there is no incremental merge.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::domain::instrument::InstrumentKey;

/// One historical OHLCV bar.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistoricalCandle {
    /// Bar start as sent by the backend.
    pub timestamp: String,
    /// Open.
    pub open: f64,
    /// High.
    pub high: f64,
    /// Low.
    pub low: f64,
    /// Close.
    pub close: f64,
    /// Volume.
    #[serde(default)]
    pub volume: f64,
    /// Open interest; zero when not reported.
    #[serde(default)]
    pub oi: f64,
}

type Series = HashMap<String, Vec<HistoricalCandle>>;

/// Candles by instrument, then by interval.
#[derive(Debug, Default)]
pub struct HistoryStore {
    series: RwLock<HashMap<InstrumentKey, Series>>,
}

impl HistoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the candles for one instrument and interval.
    pub fn replace(&self, key: InstrumentKey, interval: &str, candles: Vec<HistoricalCandle>) {
        tracing::debug!(instrument = %key, interval, count = candles.len(), "History replaced");
        self.series
            .write()
            .entry(key)
            .or_default()
            .insert(interval.to_string(), candles);
    }

    /// Candles for one instrument and interval; empty when never fetched.
    #[must_use]
    pub fn get(&self, key: &InstrumentKey, interval: &str) -> Vec<HistoricalCandle> {
        self.series
            .read()
            .get(key)
            .and_then(|series| series.get(interval))
            .cloned()
            .unwrap_or_default()
    }

    /// Intervals stored for an instrument, sorted.
    #[must_use]
    pub fn intervals(&self, key: &InstrumentKey) -> Vec<String> {
        let mut intervals: Vec<_> = self
            .series
            .read()
            .get(key)
            .map(|series| series.keys().cloned().collect())
            .unwrap_or_default();
        intervals.sort();
        intervals
    }

    /// Number of instruments with any history.
    #[must_use]
    pub fn len(&self) -> usize {
        self.series.read().len()
    }

    /// Whether no history is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: f64) -> HistoricalCandle {
        HistoricalCandle {
            timestamp: "2024-01-15T09:15:00+05:30".to_string(),
            close,
            ..HistoricalCandle::default()
        }
    }

    #[test]
    fn replace_is_full_replace_per_interval() {
        let store = HistoryStore::new();
        let key = InstrumentKey::new("NSE_FO|41880");

        store.replace(key.clone(), "1minute", vec![candle(1.0), candle(2.0)]);
        store.replace(key.clone(), "day", vec![candle(9.0)]);
        store.replace(key.clone(), "1minute", vec![candle(3.0)]);

        assert_eq!(store.get(&key, "1minute"), vec![candle(3.0)]);
        assert_eq!(store.get(&key, "day").len(), 1);
        assert_eq!(store.intervals(&key), vec!["1minute", "day"]);
    }

    #[test]
    fn unknown_series_is_empty() {
        let store = HistoryStore::new();
        assert!(store.get(&InstrumentKey::new("X"), "day").is_empty());
        assert!(store.is_empty());
    }
}
