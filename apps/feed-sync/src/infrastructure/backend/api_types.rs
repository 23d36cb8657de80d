//! Backend REST request and response types.
//!
//! These types map directly to the backend's JSON bodies. Prices are
//! [`Decimal`] and go over the wire as strings.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::services::HistoricalCandle;
use crate::domain::instrument::InstrumentKey;
use crate::domain::subscription::DeliveryMode;

// ============================================================================
// Feed Types
// ============================================================================

/// Body of `/feed/subscribe` and `/feed/unsubscribe`.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest<'a> {
    /// Instruments to (un)subscribe.
    pub instrument_keys: &'a [InstrumentKey],
    /// Delivery mode. Ignored by the backend on unsubscribe.
    pub mode: DeliveryMode,
}

/// Acknowledgement of a feed mutation.
///
/// The backend answers with `{message}`, `{ok}` or both; only an explicit
/// `ok: false` counts as a rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AckResponse {
    /// Explicit success flag, when sent.
    #[serde(default)]
    pub ok: Option<bool>,
    /// Human-readable outcome.
    #[serde(default)]
    pub message: Option<String>,
    /// Error description, when sent.
    #[serde(default)]
    pub error: Option<String>,
}

impl AckResponse {
    /// Whether the backend rejected the request.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self.ok, Some(false))
    }

    /// Best description of a rejection.
    #[must_use]
    pub fn reason(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "ok: false".to_string())
    }
}

/// Response of `/feed/subscriptions`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionsResponse {
    /// Number of subscriptions.
    #[serde(default)]
    pub count: usize,
    /// Subscribed instruments.
    #[serde(default)]
    pub subscriptions: Vec<InstrumentKey>,
}

/// Response of `/feed/status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct FeedStatus {
    /// Whether the backend's upstream market-data connection is up.
    #[serde(default)]
    pub connected: bool,
}

// ============================================================================
// History Types
// ============================================================================

/// Extract candles from a history response.
///
/// Accepts `{data: {candles}}`, `{candles}` or a bare array. Each candle is
/// either `[ts, open, high, low, close, volume, oi?]` or an object.
/// Anything else yields no candles.
#[must_use]
pub fn parse_history(payload: &Value) -> Vec<HistoricalCandle> {
    let candles = payload
        .pointer("/data/candles")
        .or_else(|| payload.get("candles"))
        .unwrap_or(payload);

    candles
        .as_array()
        .map(|rows| rows.iter().filter_map(parse_candle).collect())
        .unwrap_or_default()
}

/// Extract per-instrument candles from a subscribed-history response.
#[must_use]
pub fn parse_subscribed_history(payload: &Value) -> HashMap<InstrumentKey, Vec<HistoricalCandle>> {
    payload
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(key, response)| (InstrumentKey::from(key.as_str()), parse_history(response)))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_candle(row: &Value) -> Option<HistoricalCandle> {
    match row {
        Value::Array(fields) => {
            let timestamp = match fields.first()? {
                Value::String(ts) => ts.clone(),
                other => other.to_string(),
            };
            Some(HistoricalCandle {
                timestamp,
                open: number(fields.get(1)),
                high: number(fields.get(2)),
                low: number(fields.get(3)),
                close: number(fields.get(4)),
                volume: number(fields.get(5)),
                oi: number(fields.get(6)),
            })
        }
        Value::Object(_) => serde_json::from_value(row.clone()).ok(),
        _ => None,
    }
}

fn number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or_default(),
        Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
        _ => 0.0,
    }
}

// ============================================================================
// Order Types
// ============================================================================

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Market order.
    #[serde(rename = "MARKET")]
    Market,
    /// Limit order.
    #[serde(rename = "LIMIT")]
    Limit,
    /// Stop-loss limit order.
    #[serde(rename = "SL")]
    StopLoss,
    /// Stop-loss market order.
    #[serde(rename = "SL-M")]
    StopLossMarket,
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

/// Product type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Product {
    /// Intraday.
    #[serde(rename = "I")]
    Intraday,
    /// Delivery.
    #[serde(rename = "D")]
    Delivery,
    /// Cover order.
    #[serde(rename = "CO")]
    CoverOrder,
    /// Margin trading facility.
    #[serde(rename = "MTF")]
    Mtf,
}

/// Order validity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Validity {
    /// Valid for the trading day.
    #[default]
    Day,
    /// Immediate or cancel.
    Ioc,
}

/// Body of `/order/place` (and each element of `/order/place-multi`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderRequest {
    /// Quantity.
    pub quantity: u64,
    /// Product type.
    pub product: Product,
    /// Validity.
    pub validity: Validity,
    /// Limit price; zero for market orders.
    pub price: Decimal,
    /// Instrument.
    pub instrument_token: InstrumentKey,
    /// Order type.
    pub order_type: OrderType,
    /// Side.
    pub transaction_type: TransactionType,
    /// Trigger price for stop orders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_price: Option<Decimal>,
    /// Disclosed quantity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disclosed_quantity: Option<u64>,
}

/// Body of `/order/modify`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderModifyRequest {
    /// Order to modify.
    pub order_id: String,
    /// New quantity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u64>,
    /// New price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    /// New order type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_type: Option<OrderType>,
    /// New trigger price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_price: Option<Decimal>,
    /// New validity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validity: Option<Validity>,
}

// ============================================================================
// GTT Types
// ============================================================================

/// GTT order shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GttType {
    /// One rule.
    Single,
    /// Entry with target and stop-loss legs.
    Multiple,
}

/// Role of a GTT rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GttStrategy {
    /// Entry leg.
    Entry,
    /// Profit target.
    Target,
    /// Stop-loss.
    Stoploss,
}

/// When a GTT rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TriggerType {
    /// Price rises above the trigger.
    Above,
    /// Price falls below the trigger.
    Below,
    /// Fire immediately.
    Immediate,
}

/// One GTT rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GttRule {
    /// Role of the rule.
    pub strategy: GttStrategy,
    /// Trigger condition.
    pub trigger_type: TriggerType,
    /// Trigger price.
    pub trigger_price: Decimal,
    /// Trailing stop gap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trailing_gap: Option<Decimal>,
}

/// Body of `/gtt/place`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GttPlaceRequest {
    /// GTT shape.
    #[serde(rename = "type")]
    pub gtt_type: GttType,
    /// Quantity.
    pub quantity: u64,
    /// Product type; intraday or delivery.
    pub product: Product,
    /// Instrument.
    pub instrument_token: InstrumentKey,
    /// Side.
    pub transaction_type: TransactionType,
    /// Rules.
    pub rules: Vec<GttRule>,
}

/// Body of `/gtt/modify`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GttModifyRequest {
    /// GTT order to modify.
    pub gtt_order_id: String,
    /// New shape.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub gtt_type: Option<GttType>,
    /// New quantity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u64>,
    /// New rules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<GttRule>>,
}

/// Body of `/gtt/cancel`.
#[derive(Debug, Clone, Serialize)]
pub struct GttCancelRequest<'a> {
    /// GTT order to cancel.
    pub gtt_order_id: &'a str,
}

// ============================================================================
// Portfolio Types
// ============================================================================

/// Funds segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FundsSegment {
    /// Securities.
    #[default]
    Securities,
    /// Commodities.
    Commodities,
}

impl FundsSegment {
    /// Query value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Securities => "SEC",
            Self::Commodities => "COM",
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    #[test_case(json!({"status": "success", "data": {"candles": [["2024-01-15T09:15:00+05:30", 100, 105, 99, 104, 1200, 50]]}}) ; "nested data")]
    #[test_case(json!({"candles": [["2024-01-15T09:15:00+05:30", 100, 105, 99, 104, 1200, 50]]}) ; "candles field")]
    #[test_case(json!([["2024-01-15T09:15:00+05:30", "100", "105", "99", "104", "1200", "50"]]) ; "bare array of strings")]
    #[test_case(json!([{"timestamp": "2024-01-15T09:15:00+05:30", "open": 100.0, "high": 105.0, "low": 99.0, "close": 104.0, "volume": 1200.0, "oi": 50.0}]) ; "objects")]
    fn history_shapes(payload: Value) {
        let candles = parse_history(&payload);
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].timestamp, "2024-01-15T09:15:00+05:30");
        assert!((candles[0].close - 104.0).abs() < f64::EPSILON);
        assert!((candles[0].oi - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_oi_defaults_to_zero() {
        let candles = parse_history(&json!([["t", 1, 2, 0.5, 1.5, 10]]));
        assert!(candles[0].oi.abs() < f64::EPSILON);
    }

    #[test]
    fn unexpected_history_shape_is_empty() {
        assert!(parse_history(&json!({"detail": "not found"})).is_empty());
        assert!(parse_history(&json!([42, "x"])).is_empty());
    }

    #[test]
    fn subscribed_history_is_keyed() {
        let payload = json!({
            "NSE_FO|1": {"status": "success", "data": {"candles": [["t", 1, 2, 0.5, 1.5, 10]]}},
            "NSE_FO|2": {"status": "error"}
        });
        let history = parse_subscribed_history(&payload);

        assert_eq!(history.len(), 2);
        assert_eq!(history[&InstrumentKey::from("NSE_FO|1")].len(), 1);
        assert!(history[&InstrumentKey::from("NSE_FO|2")].is_empty());
    }

    #[test]
    fn order_request_wire_format() {
        let order = OrderRequest {
            quantity: 75,
            product: Product::Intraday,
            validity: Validity::Day,
            price: dec!(101.5),
            instrument_token: InstrumentKey::from("NSE_FO|41880"),
            order_type: OrderType::StopLossMarket,
            transaction_type: TransactionType::Buy,
            trigger_price: Some(dec!(100)),
            disclosed_quantity: None,
        };
        let value = serde_json::to_value(&order).unwrap();

        assert_eq!(value["order_type"], "SL-M");
        assert_eq!(value["product"], "I");
        assert_eq!(value["transaction_type"], "BUY");
        assert_eq!(value["validity"], "DAY");
        assert_eq!(value["price"], "101.5");
        assert!(value.get("disclosed_quantity").is_none());
    }

    #[test]
    fn gtt_modify_omits_unset_fields() {
        let request = GttModifyRequest {
            gtt_order_id: "GTT-1".to_string(),
            quantity: Some(10),
            ..GttModifyRequest::default()
        };
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value, json!({"gtt_order_id": "GTT-1", "quantity": 10}));
    }

    #[test]
    fn ack_rejection() {
        let ack: AckResponse = serde_json::from_value(json!({"ok": false, "error": "bad key"})).unwrap();
        assert!(ack.is_rejected());
        assert_eq!(ack.reason(), "bad key");

        let ack: AckResponse = serde_json::from_value(json!({"message": "Subscribed"})).unwrap();
        assert!(!ack.is_rejected());
    }

    #[test]
    fn subscribe_request_wire_format() {
        let keys = [InstrumentKey::from("A")];
        let body = SubscribeRequest {
            instrument_keys: &keys,
            mode: DeliveryMode::FullD30,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"instrument_keys": ["A"], "mode": "full_d30"})
        );
    }
}
