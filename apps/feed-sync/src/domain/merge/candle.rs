//! Candle Feed
//!
//! Named `candle` events on `/stream/candles`, one completed 1-minute
//! candle per event, keyed by the payload's `instrument_key`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    overlay, wire, CanonicalRecord, DecodeError, Feed, Greeks, GreeksFragment, Keyed, PriceChange,
};
use crate::domain::channel::ChannelKind;
use crate::domain::instrument::InstrumentKey;

// =============================================================================
// Sub-records
// =============================================================================

/// A resting order cluster at one price.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Wall {
    /// Price level.
    #[serde(default)]
    pub price: f64,
    /// Quantity at the level.
    #[serde(default)]
    pub qty: f64,
}

/// Order book summary at candle close.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct BidAskSnapshot {
    /// Largest bid clusters.
    pub bid_walls: Vec<Wall>,
    /// Largest ask clusters.
    pub ask_walls: Vec<Wall>,
    /// Best bid price.
    pub best_bid_price: f64,
    /// Best bid quantity.
    pub best_bid_qty: f64,
    /// Best ask price.
    pub best_ask_price: f64,
    /// Best ask quantity.
    pub best_ask_qty: f64,
    /// Ask minus bid.
    pub spread: f64,
    /// Total resting bid quantity.
    pub total_bid_qty: f64,
    /// Total resting ask quantity.
    pub total_ask_qty: f64,
}

/// Partial order book summary. Wall lists replace wholesale when present.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct BidAskFragment {
    /// Bid walls.
    pub bid_walls: Option<Vec<Wall>>,
    /// Ask walls.
    pub ask_walls: Option<Vec<Wall>>,
    /// Best bid price.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub best_bid_price: Option<f64>,
    /// Best bid quantity.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub best_bid_qty: Option<f64>,
    /// Best ask price.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub best_ask_price: Option<f64>,
    /// Best ask quantity.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub best_ask_qty: Option<f64>,
    /// Spread.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub spread: Option<f64>,
    /// Total bid quantity.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub total_bid_qty: Option<f64>,
    /// Total ask quantity.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub total_ask_qty: Option<f64>,
}

impl BidAskSnapshot {
    fn overlay(&mut self, fragment: &BidAskFragment) {
        overlay!(self, fragment;
            bid_walls, ask_walls,
            best_bid_price, best_bid_qty, best_ask_price, best_ask_qty,
            spread, total_bid_qty, total_ask_qty,
        );
    }
}

// =============================================================================
// Canonical Record
// =============================================================================

/// Latest completed candle for one instrument.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Candle {
    /// Candle start as sent by the server.
    pub timestamp: String,
    /// Open.
    pub open: f64,
    /// High.
    pub high: f64,
    /// Low.
    pub low: f64,
    /// Close.
    pub close: f64,
    /// Previous candle close.
    pub prev_close: f64,
    /// Order book summary.
    pub bid_ask: BidAskSnapshot,
    /// Spread change since previous candle.
    pub spread_diff: f64,
    /// Option greeks.
    pub greeks: Greeks,
    /// Delta change.
    pub delta_diff: f64,
    /// Theta change.
    pub theta_diff: f64,
    /// Gamma change.
    pub gamma_diff: f64,
    /// Vega change.
    pub vega_diff: f64,
    /// Rho change.
    pub rho_diff: f64,
    /// Average traded price.
    pub atp: f64,
    /// ATP change.
    pub atp_diff: f64,
    /// Cumulative volume.
    pub vtt: f64,
    /// Volume within this minute.
    pub volume_1m: f64,
    /// Open interest.
    pub oi: f64,
    /// OI change.
    pub oi_diff: f64,
    /// Implied volatility.
    pub iv: f64,
    /// IV change.
    pub iv_diff: f64,
    /// Total buy quantity.
    pub tbq: f64,
    /// TBQ change.
    pub tbq_diff: f64,
    /// Total sell quantity.
    pub tsq: f64,
    /// TSQ change.
    pub tsq_diff: f64,
    /// `close - prev_close`.
    pub price_diff: f64,
    /// `price_diff / prev_close * 100`.
    pub price_diff_percent: f64,
    /// Time of the last merge.
    pub observed_at: DateTime<Utc>,
}

/// Partial candle as pushed by the server.
///
/// The server's own `price_diff` is ignored; it is recomputed on merge.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct CandleFragment {
    /// Candle start.
    pub timestamp: Option<String>,
    /// Open.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub open: Option<f64>,
    /// High.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub high: Option<f64>,
    /// Low.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub low: Option<f64>,
    /// Close.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub close: Option<f64>,
    /// Previous candle close.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub prev_close: Option<f64>,
    /// Order book summary.
    pub bid_ask: Option<BidAskFragment>,
    /// Spread change.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub spread_diff: Option<f64>,
    /// Greeks.
    pub greeks: Option<GreeksFragment>,
    /// Delta change.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub delta_diff: Option<f64>,
    /// Theta change.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub theta_diff: Option<f64>,
    /// Gamma change.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub gamma_diff: Option<f64>,
    /// Vega change.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub vega_diff: Option<f64>,
    /// Rho change.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub rho_diff: Option<f64>,
    /// ATP.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub atp: Option<f64>,
    /// ATP change.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub atp_diff: Option<f64>,
    /// Cumulative volume.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub vtt: Option<f64>,
    /// Minute volume.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub volume_1m: Option<f64>,
    /// Open interest.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub oi: Option<f64>,
    /// OI change.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub oi_diff: Option<f64>,
    /// IV.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub iv: Option<f64>,
    /// IV change.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub iv_diff: Option<f64>,
    /// TBQ.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub tbq: Option<f64>,
    /// TBQ change.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub tbq_diff: Option<f64>,
    /// TSQ.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub tsq: Option<f64>,
    /// TSQ change.
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub tsq_diff: Option<f64>,
}

impl CanonicalRecord for Candle {
    type Fragment = CandleFragment;

    fn overlay(&mut self, fragment: &CandleFragment) {
        overlay!(self, fragment;
            timestamp, open, high, low, close, prev_close, spread_diff,
            delta_diff, theta_diff, gamma_diff, vega_diff, rho_diff,
            atp, atp_diff, vtt, volume_1m, oi, oi_diff, iv, iv_diff,
            tbq, tbq_diff, tsq, tsq_diff,
        );
        if let Some(bid_ask) = &fragment.bid_ask {
            self.bid_ask.overlay(bid_ask);
        }
        if let Some(greeks) = &fragment.greeks {
            self.greeks.overlay(greeks);
        }
    }

    fn recompute(&mut self) {
        let change = PriceChange::between(self.prev_close, self.close);
        self.price_diff = change.delta;
        self.price_diff_percent = change.percent;
    }

    fn stamp(&mut self, observed_at: DateTime<Utc>) {
        self.observed_at = observed_at;
    }
}

// =============================================================================
// Feed
// =============================================================================

#[derive(Debug, Deserialize)]
struct CandleMessage {
    instrument_key: Option<String>,
    #[serde(flatten)]
    fragment: CandleFragment,
}

/// Candle feed.
#[derive(Debug, Clone, Copy)]
pub struct CandleFeed;

impl Feed for CandleFeed {
    const KIND: ChannelKind = ChannelKind::Candle;
    type Key = InstrumentKey;
    type Record = Candle;

    fn decode(data: &str) -> Result<Vec<Keyed<InstrumentKey, CandleFragment>>, DecodeError> {
        let message: CandleMessage = serde_json::from_str(data)?;
        let key = message
            .instrument_key
            .filter(|key| !key.is_empty())
            .ok_or(DecodeError::MissingKey("instrument_key"))?;
        Ok(vec![Keyed::new(InstrumentKey::new(key), message.fragment)])
    }
}
