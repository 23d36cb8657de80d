//! Live Quote Feed
//!
//! Unnamed `message` events on `/stream/live`. One payload carries fragments
//! for many instruments:
//!
//! ```json
//! {"type": "live_feed",
//!  "feeds": {"NSE_FO|41880": {"fullFeed": {"marketFF": {"ltpc": {"ltp": 101.5, "cp": 98.0}}}}},
//!  "currentTs": "1700000000000"}
//! ```
//!
//! Index instruments use `indexFF` instead of `marketFF`. In `ltpc` delivery
//! mode the feed is just `{"ltpc": {...}}`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    overlay, wire, CanonicalRecord, DecodeError, Feed, Greeks, GreeksFragment, Keyed, PriceChange,
};
use crate::domain::channel::ChannelKind;
use crate::domain::instrument::InstrumentKey;

// =============================================================================
// Canonical Record
// =============================================================================

/// Accumulated live quote for one instrument.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LiveQuote {
    /// Last traded price.
    pub ltp: f64,
    /// Previous session close; reference for the change.
    pub close: f64,
    /// Last traded time (epoch millis).
    pub last_traded_time: i64,
    /// Last traded quantity.
    pub last_traded_qty: u64,
    /// Session open.
    pub open: f64,
    /// Session high.
    pub high: f64,
    /// Session low.
    pub low: f64,
    /// Close of the daily OHLC bar.
    pub day_close: f64,
    /// Average traded price.
    pub atp: f64,
    /// Volume traded today.
    pub volume: u64,
    /// Open interest.
    pub oi: f64,
    /// Implied volatility.
    pub iv: f64,
    /// Total buy quantity.
    pub total_buy_qty: f64,
    /// Total sell quantity.
    pub total_sell_qty: f64,
    /// Best bid price.
    pub best_bid: f64,
    /// Best bid quantity.
    pub best_bid_qty: u64,
    /// Best ask price.
    pub best_ask: f64,
    /// Best ask quantity.
    pub best_ask_qty: u64,
    /// Option greeks.
    pub greeks: Greeks,
    /// `ltp - close`.
    pub change: f64,
    /// `change / close * 100`.
    pub change_percent: f64,
    /// Time of the last merge.
    pub observed_at: DateTime<Utc>,
}

/// Partial live quote.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuoteFragment {
    /// Last traded price.
    pub ltp: Option<f64>,
    /// Previous close.
    pub close: Option<f64>,
    /// Last traded time.
    pub last_traded_time: Option<i64>,
    /// Last traded quantity.
    pub last_traded_qty: Option<u64>,
    /// Session open.
    pub open: Option<f64>,
    /// Session high.
    pub high: Option<f64>,
    /// Session low.
    pub low: Option<f64>,
    /// Daily bar close.
    pub day_close: Option<f64>,
    /// Average traded price.
    pub atp: Option<f64>,
    /// Volume traded today.
    pub volume: Option<u64>,
    /// Open interest.
    pub oi: Option<f64>,
    /// Implied volatility.
    pub iv: Option<f64>,
    /// Total buy quantity.
    pub total_buy_qty: Option<f64>,
    /// Total sell quantity.
    pub total_sell_qty: Option<f64>,
    /// Best bid price.
    pub best_bid: Option<f64>,
    /// Best bid quantity.
    pub best_bid_qty: Option<u64>,
    /// Best ask price.
    pub best_ask: Option<f64>,
    /// Best ask quantity.
    pub best_ask_qty: Option<u64>,
    /// Option greeks.
    pub greeks: Option<GreeksFragment>,
}

impl CanonicalRecord for LiveQuote {
    type Fragment = QuoteFragment;

    fn overlay(&mut self, fragment: &QuoteFragment) {
        overlay!(self, fragment;
            ltp, close, last_traded_time, last_traded_qty,
            open, high, low, day_close,
            atp, volume, oi, iv, total_buy_qty, total_sell_qty,
            best_bid, best_bid_qty, best_ask, best_ask_qty,
        );
        if let Some(greeks) = &fragment.greeks {
            self.greeks.overlay(greeks);
        }
    }

    fn recompute(&mut self) {
        let change = PriceChange::between(self.close, self.ltp);
        self.change = change.delta;
        self.change_percent = change.percent;
    }

    fn stamp(&mut self, observed_at: DateTime<Utc>) {
        self.observed_at = observed_at;
    }
}

// =============================================================================
// Wire Schema
// =============================================================================

#[derive(Debug, Deserialize)]
struct LiveFeedMessage {
    #[serde(default)]
    feeds: Option<HashMap<String, InstrumentFeedWire>>,
}

#[derive(Debug, Deserialize)]
struct InstrumentFeedWire {
    #[serde(rename = "fullFeed")]
    full_feed: Option<FullFeedWire>,
    ltpc: Option<LtpcWire>,
}

#[derive(Debug, Deserialize)]
struct FullFeedWire {
    #[serde(rename = "marketFF")]
    market_ff: Option<MarketFullFeedWire>,
    #[serde(rename = "indexFF")]
    index_ff: Option<MarketFullFeedWire>,
}

#[derive(Debug, Default, Deserialize)]
struct MarketFullFeedWire {
    ltpc: Option<LtpcWire>,
    #[serde(rename = "marketOHLC")]
    market_ohlc: Option<MarketOhlcWire>,
    #[serde(rename = "marketLevel")]
    market_level: Option<MarketLevelWire>,
    #[serde(rename = "optionGreeks")]
    option_greeks: Option<GreeksFragment>,
    #[serde(default, deserialize_with = "wire::opt_f64")]
    atp: Option<f64>,
    #[serde(default, deserialize_with = "wire::opt_u64")]
    vtt: Option<u64>,
    #[serde(default, deserialize_with = "wire::opt_f64")]
    oi: Option<f64>,
    #[serde(default, deserialize_with = "wire::opt_f64")]
    iv: Option<f64>,
    #[serde(default, deserialize_with = "wire::opt_f64")]
    tbq: Option<f64>,
    #[serde(default, deserialize_with = "wire::opt_f64")]
    tsq: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct LtpcWire {
    #[serde(default, deserialize_with = "wire::opt_f64")]
    ltp: Option<f64>,
    #[serde(default, deserialize_with = "wire::opt_i64")]
    ltt: Option<i64>,
    #[serde(default, deserialize_with = "wire::opt_u64")]
    ltq: Option<u64>,
    #[serde(default, deserialize_with = "wire::opt_f64")]
    cp: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct MarketOhlcWire {
    #[serde(default)]
    ohlc: Vec<OhlcWire>,
}

#[derive(Debug, Deserialize)]
struct OhlcWire {
    interval: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_f64")]
    open: Option<f64>,
    #[serde(default, deserialize_with = "wire::opt_f64")]
    high: Option<f64>,
    #[serde(default, deserialize_with = "wire::opt_f64")]
    low: Option<f64>,
    #[serde(default, deserialize_with = "wire::opt_f64")]
    close: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct MarketLevelWire {
    #[serde(rename = "bidAskQuote", default)]
    bid_ask_quote: Vec<BidAskQuoteWire>,
    #[serde(rename = "optionGreeks")]
    option_greeks: Option<GreeksFragment>,
}

#[derive(Debug, Deserialize)]
struct BidAskQuoteWire {
    #[serde(rename = "bidQ", default, deserialize_with = "wire::opt_u64")]
    bid_qty: Option<u64>,
    #[serde(rename = "bidP", default, deserialize_with = "wire::opt_f64")]
    bid_price: Option<f64>,
    #[serde(rename = "askQ", default, deserialize_with = "wire::opt_u64")]
    ask_qty: Option<u64>,
    #[serde(rename = "askP", default, deserialize_with = "wire::opt_f64")]
    ask_price: Option<f64>,
}

impl InstrumentFeedWire {
    fn into_fragment(self) -> Option<QuoteFragment> {
        if let Some(full) = self.full_feed {
            let market = full.market_ff.or(full.index_ff)?;
            return Some(market.into_fragment());
        }
        self.ltpc.map(|ltpc| {
            let mut fragment = QuoteFragment::default();
            ltpc.apply(&mut fragment);
            fragment
        })
    }
}

impl LtpcWire {
    fn apply(self, fragment: &mut QuoteFragment) {
        fragment.ltp = self.ltp;
        fragment.close = self.cp;
        fragment.last_traded_time = self.ltt;
        fragment.last_traded_qty = self.ltq;
    }
}

impl MarketFullFeedWire {
    fn into_fragment(self) -> QuoteFragment {
        let mut fragment = QuoteFragment {
            atp: self.atp,
            volume: self.vtt,
            oi: self.oi,
            iv: self.iv,
            total_buy_qty: self.tbq,
            total_sell_qty: self.tsq,
            ..QuoteFragment::default()
        };

        if let Some(ltpc) = self.ltpc {
            ltpc.apply(&mut fragment);
        }

        if let Some(daily) = self.market_ohlc.and_then(|m| daily_bar(m.ohlc)) {
            fragment.open = daily.open;
            fragment.high = daily.high;
            fragment.low = daily.low;
            fragment.day_close = daily.close;
        }

        let mut level_greeks = None;
        if let Some(level) = self.market_level {
            if let Some(top) = level.bid_ask_quote.into_iter().next() {
                fragment.best_bid = top.bid_price;
                fragment.best_bid_qty = top.bid_qty;
                fragment.best_ask = top.ask_price;
                fragment.best_ask_qty = top.ask_qty;
            }
            level_greeks = level.option_greeks;
        }
        fragment.greeks = self.option_greeks.or(level_greeks);

        fragment
    }
}

/// The daily bar, else the first bar.
fn daily_bar(bars: Vec<OhlcWire>) -> Option<OhlcWire> {
    let position = bars
        .iter()
        .position(|bar| bar.interval.as_deref() == Some("1d"))
        .unwrap_or(0);
    bars.into_iter().nth(position)
}

// =============================================================================
// Feed
// =============================================================================

/// Live quote feed.
#[derive(Debug, Clone, Copy)]
pub struct QuoteFeed;

impl Feed for QuoteFeed {
    const KIND: ChannelKind = ChannelKind::LiveQuote;
    type Key = InstrumentKey;
    type Record = LiveQuote;

    fn decode(data: &str) -> Result<Vec<Keyed<InstrumentKey, QuoteFragment>>, DecodeError> {
        let message: LiveFeedMessage = serde_json::from_str(data)?;
        let Some(feeds) = message.feeds else {
            return Ok(Vec::new());
        };

        let mut fragments: Vec<_> = feeds
            .into_iter()
            .filter_map(|(key, feed)| {
                feed.into_fragment()
                    .map(|fragment| Keyed::new(InstrumentKey::new(key), fragment))
            })
            .collect();
        fragments.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(fragments)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::domain::merge::merge;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn change_uses_preserved_close() {
        let first = QuoteFragment {
            ltp: Some(100.0),
            close: Some(90.0),
            ..QuoteFragment::default()
        };
        let second = QuoteFragment {
            ltp: Some(105.0),
            ..QuoteFragment::default()
        };

        let record: LiveQuote = merge(None, &first, at(1));
        let record: LiveQuote = merge(Some(&record), &second, at(2));

        assert!((record.ltp - 105.0).abs() < f64::EPSILON);
        assert!((record.close - 90.0).abs() < f64::EPSILON);
        assert!((record.change - 15.0).abs() < 1e-9);
        assert!((record.change_percent - 16.67).abs() < 0.01);
        assert_eq!(record.observed_at, at(2));
    }

    #[test]
    fn zero_close_gives_zero_change() {
        let record = merge::<LiveQuote>(
            None,
            &QuoteFragment {
                ltp: Some(101.0),
                ..QuoteFragment::default()
            },
            at(1),
        );

        assert!(record.change.abs() < f64::EPSILON);
        assert!(record.change_percent.abs() < f64::EPSILON);
    }

    #[test]
    fn remerge_is_fixed_point() {
        let fragment = QuoteFragment {
            ltp: Some(250.5),
            close: Some(240.0),
            volume: Some(1200),
            ..QuoteFragment::default()
        };

        let once: LiveQuote = merge(None, &fragment, at(5));
        let twice: LiveQuote = merge(Some(&once), &fragment, at(5));
        assert_eq!(once, twice);
    }

    #[test]
    fn present_zero_overwrites() {
        let record = merge::<LiveQuote>(
            None,
            &QuoteFragment {
                oi: Some(500.0),
                ..QuoteFragment::default()
            },
            at(1),
        );
        let record: LiveQuote = merge(
            Some(&record),
            &QuoteFragment {
                oi: Some(0.0),
                ..QuoteFragment::default()
            },
            at(2),
        );

        assert!(record.oi.abs() < f64::EPSILON);
    }

    #[test]
    fn decodes_market_full_feed() {
        let payload = r#"{
            "type": "live_feed",
            "feeds": {
                "NSE_FO|41880": {
                    "fullFeed": {
                        "marketFF": {
                            "ltpc": {"ltp": 101.5, "ltt": "1700000000000", "ltq": "75", "cp": 98.0},
                            "marketLevel": {"bidAskQuote": [
                                {"bidQ": "150", "bidP": 101.4, "askQ": 300, "askP": 101.6},
                                {"bidQ": "75", "bidP": 101.3, "askQ": 75, "askP": 101.7}
                            ]},
                            "optionGreeks": {"delta": 0.52, "theta": -3.1},
                            "marketOHLC": {"ohlc": [
                                {"interval": "I1", "open": 101.0, "high": 101.9, "low": 100.8, "close": 101.5},
                                {"interval": "1d", "open": 97.0, "high": 103.0, "low": 96.5, "close": 101.5}
                            ]},
                            "atp": 99.8, "vtt": "125000", "oi": 45000.0, "iv": 0.18,
                            "tbq": 12000.0, "tsq": 9000.0
                        }
                    }
                }
            },
            "currentTs": "1700000000100"
        }"#;

        let fragments = QuoteFeed::decode(payload).unwrap();
        assert_eq!(fragments.len(), 1);

        let keyed = &fragments[0];
        assert_eq!(keyed.key.as_str(), "NSE_FO|41880");
        let f = &keyed.fragment;
        assert_eq!(f.ltp, Some(101.5));
        assert_eq!(f.close, Some(98.0));
        assert_eq!(f.last_traded_time, Some(1_700_000_000_000));
        assert_eq!(f.last_traded_qty, Some(75));
        assert_eq!(f.open, Some(97.0));
        assert_eq!(f.day_close, Some(101.5));
        assert_eq!(f.best_bid, Some(101.4));
        assert_eq!(f.best_ask_qty, Some(300));
        assert_eq!(f.volume, Some(125_000));
        assert_eq!(f.greeks.and_then(|g| g.delta), Some(0.52));
    }

    #[test]
    fn decodes_index_and_ltpc_only_feeds() {
        let payload = r#"{"feeds": {
            "NSE_INDEX|Nifty 50": {"fullFeed": {"indexFF": {"ltpc": {"ltp": 22000.5, "cp": 21900.0}}}},
            "NSE_EQ|INE002A01018": {"ltpc": {"ltp": 2900.0, "cp": 2880.0}}
        }}"#;

        let fragments = QuoteFeed::decode(payload).unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].key.as_str(), "NSE_EQ|INE002A01018");
        assert_eq!(fragments[0].fragment.ltp, Some(2900.0));
        assert_eq!(fragments[1].fragment.close, Some(21900.0));
    }

    #[test]
    fn non_finite_strings_never_reach_the_record() {
        let payload = r#"{"feeds": {"NSE_FO|41880": {"fullFeed": {"marketFF": {
            "ltpc": {"ltp": "NaN", "cp": "inf"},
            "atp": "-inf", "oi": 45000.0
        }}}}}"#;

        let fragments = QuoteFeed::decode(payload).unwrap();
        let fragment = &fragments[0].fragment;
        assert_eq!(fragment.ltp, None);
        assert_eq!(fragment.close, None);
        assert_eq!(fragment.atp, None);
        assert_eq!(fragment.oi, Some(45000.0));

        let once: LiveQuote = merge(None, fragment, at(5));
        let twice: LiveQuote = merge(Some(&once), fragment, at(5));
        assert!(once.change.is_finite());
        assert!(once.change_percent.is_finite());
        assert_eq!(once, twice);
    }

    #[test]
    fn payload_without_feeds_yields_nothing() {
        let fragments = QuoteFeed::decode(r#"{"type": "market_info"}"#).unwrap();
        assert!(fragments.is_empty());
    }

    #[test]
    fn invalid_json_is_decode_error() {
        assert!(matches!(
            QuoteFeed::decode("not json"),
            Err(DecodeError::Json(_))
        ));
    }
}
