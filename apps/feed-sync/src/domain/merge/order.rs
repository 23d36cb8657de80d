//! Order Update Feed
//!
//! Named `order` events on `/stream/orders`. Records are keyed by
//! `order_id`, not by instrument, so a later `complete` update folds into the
//! same record as the earlier `open` one.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{overlay, guarded_percent, wire, CanonicalRecord, DecodeError, Feed, Keyed};
use crate::domain::channel::ChannelKind;

/// Broker order identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Create a new order id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accumulated state of one order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct OrderUpdate {
    /// Lifecycle status (`open`, `complete`, `rejected`, ...).
    pub status: String,
    /// Instrument the order is for.
    pub instrument_key: String,
    /// Exchange trading symbol.
    pub trading_symbol: String,
    /// `BUY` or `SELL`.
    pub transaction_type: String,
    /// `MARKET`, `LIMIT`, `SL`, `SL-M`.
    pub order_type: String,
    /// Product code (`I`, `D`, `MTF`).
    pub product: String,
    /// Ordered quantity.
    pub quantity: u64,
    /// Filled quantity.
    pub filled_quantity: u64,
    /// Limit price.
    pub price: Decimal,
    /// Trigger price.
    pub trigger_price: Decimal,
    /// Average fill price.
    pub average_price: Decimal,
    /// Broker or exchange message.
    pub status_message: String,
    /// Order placement time as sent by the broker.
    pub order_timestamp: String,
    /// Exchange-assigned id.
    pub exchange_order_id: String,
    /// `quantity - filled_quantity`, floored at zero.
    pub pending_quantity: u64,
    /// `filled_quantity / quantity * 100`.
    pub fill_percent: f64,
    /// Time of the last merge.
    pub observed_at: DateTime<Utc>,
}

/// Partial order update.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct OrderFragment {
    /// Status.
    pub status: Option<String>,
    /// Instrument.
    #[serde(alias = "instrument_token")]
    pub instrument_key: Option<String>,
    /// Trading symbol.
    #[serde(alias = "tradingsymbol")]
    pub trading_symbol: Option<String>,
    /// Side.
    pub transaction_type: Option<String>,
    /// Order type.
    pub order_type: Option<String>,
    /// Product.
    pub product: Option<String>,
    /// Quantity.
    #[serde(default, deserialize_with = "wire::opt_u64")]
    pub quantity: Option<u64>,
    /// Filled quantity.
    #[serde(default, deserialize_with = "wire::opt_u64")]
    pub filled_quantity: Option<u64>,
    /// Limit price.
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Trigger price.
    #[serde(default)]
    pub trigger_price: Option<Decimal>,
    /// Average price.
    #[serde(default)]
    pub average_price: Option<Decimal>,
    /// Status message.
    pub status_message: Option<String>,
    /// Placement time.
    pub order_timestamp: Option<String>,
    /// Exchange id.
    pub exchange_order_id: Option<String>,
}

impl CanonicalRecord for OrderUpdate {
    type Fragment = OrderFragment;

    fn overlay(&mut self, fragment: &OrderFragment) {
        overlay!(self, fragment;
            status, instrument_key, trading_symbol, transaction_type, order_type, product,
            quantity, filled_quantity, price, trigger_price, average_price,
            status_message, order_timestamp, exchange_order_id,
        );
    }

    fn recompute(&mut self) {
        self.pending_quantity = self.quantity.saturating_sub(self.filled_quantity);
        self.fill_percent = guarded_percent(self.filled_quantity, self.quantity);
    }

    fn stamp(&mut self, observed_at: DateTime<Utc>) {
        self.observed_at = observed_at;
    }
}

#[derive(Debug, Deserialize)]
struct OrderMessage {
    order_id: Option<String>,
    #[serde(flatten)]
    fragment: OrderFragment,
}

/// Order update feed.
#[derive(Debug, Clone, Copy)]
pub struct OrderFeed;

impl Feed for OrderFeed {
    const KIND: ChannelKind = ChannelKind::OrderUpdate;
    type Key = OrderId;
    type Record = OrderUpdate;

    fn decode(data: &str) -> Result<Vec<Keyed<OrderId, OrderFragment>>, DecodeError> {
        let message: OrderMessage = serde_json::from_str(data)?;
        let id = message
            .order_id
            .filter(|id| !id.is_empty())
            .ok_or(DecodeError::MissingKey("order_id"))?;
        Ok(vec![Keyed::new(OrderId::new(id), message.fragment)])
    }
}
