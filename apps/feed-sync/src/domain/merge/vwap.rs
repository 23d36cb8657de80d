//! VWAP Feed
//!
//! Unnamed `message` events on `/stream/vwap`:
//! `{"instrument_key", "timestamp", "vwap", "ltp", "volume"}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{overlay, wire, CanonicalRecord, DecodeError, Feed, Keyed, PriceChange};
use crate::domain::channel::ChannelKind;
use crate::domain::instrument::InstrumentKey;

/// Running VWAP for one instrument.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Vwap {
    /// Volume-weighted average price.
    pub vwap: f64,
    /// Last traded price.
    pub ltp: f64,
    /// Volume behind the average.
    pub volume: f64,
    /// Server computation time (epoch millis).
    pub source_timestamp: i64,
    /// `ltp - vwap`.
    pub premium: f64,
    /// `premium / vwap * 100`.
    pub premium_percent: f64,
    /// Time of the last merge.
    pub observed_at: DateTime<Utc>,
}

/// Partial VWAP update.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct VwapFragment {
    /// VWAP.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub vwap: Option<f64>,
    /// LTP.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub ltp: Option<f64>,
    /// Volume.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub volume: Option<f64>,
    /// Server timestamp.
    #[serde(rename = "timestamp", default, deserialize_with = "wire::opt_i64")]
    pub source_timestamp: Option<i64>,
}

impl CanonicalRecord for Vwap {
    type Fragment = VwapFragment;

    fn overlay(&mut self, fragment: &VwapFragment) {
        overlay!(self, fragment; vwap, ltp, volume, source_timestamp);
    }

    fn recompute(&mut self) {
        let premium = PriceChange::between(self.vwap, self.ltp);
        self.premium = premium.delta;
        self.premium_percent = premium.percent;
    }

    fn stamp(&mut self, observed_at: DateTime<Utc>) {
        self.observed_at = observed_at;
    }
}

#[derive(Debug, Deserialize)]
struct VwapMessage {
    instrument_key: Option<String>,
    #[serde(flatten)]
    fragment: VwapFragment,
}

/// VWAP feed.
#[derive(Debug, Clone, Copy)]
pub struct VwapFeed;

impl Feed for VwapFeed {
    const KIND: ChannelKind = ChannelKind::Vwap;
    type Key = InstrumentKey;
    type Record = Vwap;

    fn decode(data: &str) -> Result<Vec<Keyed<InstrumentKey, VwapFragment>>, DecodeError> {
        let message: VwapMessage = serde_json::from_str(data)?;
        let key = message
            .instrument_key
            .filter(|key| !key.is_empty())
            .ok_or(DecodeError::MissingKey("instrument_key"))?;
        Ok(vec![Keyed::new(InstrumentKey::new(key), message.fragment)])
    }
}
