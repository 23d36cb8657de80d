//! Backend REST Client
//!
//! One reqwest client for every request/response call the sync layer makes:
//! feed subscriptions, history, order and GTT actions, portfolio reads.
//!
//! Failure handling differs by call family:
//! - feed mutations and order/GTT actions return [`RequestError`]
//! - history and portfolio reads return empty results and log the failure

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::api_types::{
    AckResponse, FeedStatus, FundsSegment, GttCancelRequest, GttModifyRequest, GttPlaceRequest,
    OrderModifyRequest, OrderRequest, SubscribeRequest, SubscriptionsResponse, parse_history,
    parse_subscribed_history,
};
use crate::application::ports::{RequestError, SubscriptionBackend};
use crate::application::services::HistoricalCandle;
use crate::domain::instrument::InstrumentKey;
use crate::domain::subscription::DeliveryMode;
use crate::infrastructure::config::ApiSettings;
use crate::infrastructure::metrics;

/// Date range and interval of a history request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Candle interval, e.g. `1minute` or `day`.
    pub interval: String,
    /// First day, `YYYY-MM-DD`.
    pub from_date: String,
    /// Last day, `YYYY-MM-DD`.
    pub to_date: String,
}

/// HTTP client for the backend's REST routes.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    api_root: String,
}

impl BackendClient {
    /// Create a client with the configured request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(settings: &ApiSettings) -> Result<Self, RequestError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| RequestError::Network(e.to_string()))?;

        Ok(Self::with_client(client, settings.api_root()))
    }

    /// Create a client over an existing reqwest client.
    #[must_use]
    pub fn with_client(client: Client, api_root: impl Into<String>) -> Self {
        Self {
            client,
            api_root: api_root.into().trim_end_matches('/').to_string(),
        }
    }

    /// Root every route is joined to.
    #[must_use]
    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    // =========================================================================
    // Feed
    // =========================================================================

    /// Upstream market-data connection status.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn feed_status(&self) -> Result<FeedStatus, RequestError> {
        self.get("feed_status", "/feed/status", &[]).await
    }

    /// Ask the backend to connect its upstream feed.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn connect_feed(&self) -> Result<Value, RequestError> {
        self.send("feed_connect", Method::POST, "/feed/connect", None::<&()>)
            .await
    }

    /// Ask the backend to disconnect its upstream feed.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn disconnect_feed(&self) -> Result<Value, RequestError> {
        self.send("feed_disconnect", Method::POST, "/feed/disconnect", None::<&()>)
            .await
    }

    // =========================================================================
    // History
    // =========================================================================

    /// Historical candles for one instrument; empty on failure.
    pub async fn history_candles(
        &self,
        key: &InstrumentKey,
        query: &HistoryQuery,
    ) -> Vec<HistoricalCandle> {
        let params = [
            ("instrument_key", key.as_str()),
            ("interval", query.interval.as_str()),
            ("from_date", query.from_date.as_str()),
            ("to_date", query.to_date.as_str()),
        ];
        match self
            .get::<Value>("history_candles", "/history/candles", &params)
            .await
        {
            Ok(payload) => parse_history(&payload),
            Err(e) => {
                tracing::warn!(instrument = %key, error = %e, "History fetch failed");
                Vec::new()
            }
        }
    }

    /// Historical candles for every backend subscription; empty on failure.
    pub async fn subscribed_history(
        &self,
        query: &HistoryQuery,
    ) -> HashMap<InstrumentKey, Vec<HistoricalCandle>> {
        let params = [
            ("interval", query.interval.as_str()),
            ("from_date", query.from_date.as_str()),
            ("to_date", query.to_date.as_str()),
        ];
        match self
            .get::<Value>("history_subscribed", "/history/candles/subscribed", &params)
            .await
        {
            Ok(payload) => parse_subscribed_history(&payload),
            Err(e) => {
                tracing::warn!(error = %e, "Subscribed history fetch failed");
                HashMap::new()
            }
        }
    }

    // =========================================================================
    // Orders
    // =========================================================================

    /// Whether orders go to the sandbox or the live venue.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn order_mode(&self) -> Result<Value, RequestError> {
        self.get("order_mode", "/order/mode", &[]).await
    }

    /// Place one order.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the backend rejects it.
    pub async fn place_order(&self, order: &OrderRequest) -> Result<Value, RequestError> {
        self.send("order_place", Method::POST, "/order/place", Some(order))
            .await
    }

    /// Modify an open order.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the backend rejects it.
    pub async fn modify_order(&self, request: &OrderModifyRequest) -> Result<Value, RequestError> {
        self.send("order_modify", Method::PUT, "/order/modify", Some(request))
            .await
    }

    /// Cancel an open order.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the backend rejects it.
    pub async fn cancel_order(&self, order_id: &str) -> Result<Value, RequestError> {
        let url = self.url_with_segment("/order/cancel", order_id)?;
        self.execute("order_cancel", self.client.delete(url)).await
    }

    /// Place several orders in one call.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the backend rejects it.
    pub async fn place_multi_order(&self, orders: &[OrderRequest]) -> Result<Value, RequestError> {
        self.send("order_place_multi", Method::POST, "/order/place-multi", Some(&orders))
            .await
    }

    // =========================================================================
    // GTT
    // =========================================================================

    /// Place a GTT order.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the backend rejects it.
    pub async fn place_gtt(&self, request: &GttPlaceRequest) -> Result<Value, RequestError> {
        self.send("gtt_place", Method::POST, "/gtt/place", Some(request))
            .await
    }

    /// Modify a GTT order.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the backend rejects it.
    pub async fn modify_gtt(&self, request: &GttModifyRequest) -> Result<Value, RequestError> {
        self.send("gtt_modify", Method::PUT, "/gtt/modify", Some(request))
            .await
    }

    /// Cancel a GTT order.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the backend rejects it.
    pub async fn cancel_gtt(&self, gtt_order_id: &str) -> Result<Value, RequestError> {
        let body = GttCancelRequest { gtt_order_id };
        self.send("gtt_cancel", Method::DELETE, "/gtt/cancel", Some(&body))
            .await
    }

    /// One GTT order.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn gtt(&self, gtt_order_id: &str) -> Result<Value, RequestError> {
        let url = self.url_with_segment("/gtt", gtt_order_id)?;
        self.execute("gtt_get", self.client.get(url)).await
    }

    /// Every GTT order.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn gtts(&self) -> Result<Value, RequestError> {
        self.get("gtt_list", "/gtt/", &[]).await
    }

    // =========================================================================
    // Portfolio
    // =========================================================================

    /// Available funds and margin; `None` on failure.
    pub async fn funds(&self, segment: FundsSegment) -> Option<Value> {
        self.read("portfolio_funds", "/portfolio/funds", &[("segment", segment.as_str())])
            .await
    }

    /// Open positions; `None` on failure.
    pub async fn positions(&self) -> Option<Value> {
        self.read("portfolio_positions", "/portfolio/positions", &[])
            .await
    }

    /// Holdings; `None` on failure.
    pub async fn holdings(&self) -> Option<Value> {
        self.read("portfolio_holdings", "/portfolio/holdings", &[])
            .await
    }

    /// Today's trades; `None` on failure.
    pub async fn trades(&self) -> Option<Value> {
        self.read("portfolio_trades", "/portfolio/trades", &[]).await
    }

    /// Order book; `None` on failure.
    pub async fn order_book(&self) -> Option<Value> {
        self.read("portfolio_orders", "/portfolio/orders", &[]).await
    }

    /// One order's details; `None` on failure.
    pub async fn order_details(&self, order_id: &str) -> Option<Value> {
        let url = match self.url_with_segment("/portfolio/orders", order_id) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(order_id, error = %e, "Order details request not sent");
                return None;
            }
        };
        self.execute("portfolio_order_details", self.client.get(url))
            .await
            .inspect_err(|e| tracing::warn!(order_id, error = %e, "Order details fetch failed"))
            .ok()
    }

    // =========================================================================
    // Request plumbing
    // =========================================================================

    async fn read(
        &self,
        endpoint: &'static str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Option<Value> {
        self.get(endpoint, path, query)
            .await
            .inspect_err(|e| tracing::warn!(endpoint, error = %e, "Portfolio fetch failed"))
            .ok()
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, RequestError> {
        let mut builder = self.client.get(self.url(path));
        if !query.is_empty() {
            builder = builder.query(query);
        }
        self.execute(endpoint, builder).await
    }

    async fn send<T: DeserializeOwned, B: Serialize + Sync + ?Sized>(
        &self,
        endpoint: &'static str,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, RequestError> {
        let mut builder = self.client.request(method, self.url(path));
        if let Some(body) = body {
            builder = builder.json(body);
        }
        self.execute(endpoint, builder).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        builder: RequestBuilder,
    ) -> Result<T, RequestError> {
        let result = Self::round_trip(builder).await;
        if let Err(e) = &result {
            tracing::debug!(endpoint, error = %e, "Backend request failed");
            metrics::record_request_failure(endpoint);
        }
        result
    }

    async fn round_trip<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, RequestError> {
        let response = builder.send().await?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RequestError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(RequestError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(serde_json::from_str("null")?);
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_root)
    }

    fn url_with_segment(&self, path: &str, segment: &str) -> Result<Url, RequestError> {
        let mut url =
            Url::parse(&self.url(path)).map_err(|e| RequestError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| RequestError::InvalidUrl(self.url(path)))?
            .pop_if_empty()
            .push(segment);
        Ok(url)
    }

    async fn mutate_feed(
        &self,
        endpoint: &'static str,
        path: &str,
        keys: &[InstrumentKey],
        mode: DeliveryMode,
    ) -> Result<(), RequestError> {
        let body = SubscribeRequest {
            instrument_keys: keys,
            mode,
        };
        let reply: Value = self.send(endpoint, Method::POST, path, Some(&body)).await?;
        match serde_json::from_value::<AckResponse>(reply) {
            Ok(ack) if ack.is_rejected() => {
                metrics::record_request_failure(endpoint);
                Err(RequestError::Rejected(ack.reason()))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl SubscriptionBackend for BackendClient {
    async fn subscribe(
        &self,
        keys: &[InstrumentKey],
        mode: DeliveryMode,
    ) -> Result<(), RequestError> {
        self.mutate_feed("feed_subscribe", "/feed/subscribe", keys, mode)
            .await
    }

    async fn unsubscribe(&self, keys: &[InstrumentKey]) -> Result<(), RequestError> {
        self.mutate_feed("feed_unsubscribe", "/feed/unsubscribe", keys, DeliveryMode::Full)
            .await
    }

    async fn subscriptions(&self) -> Result<Vec<InstrumentKey>, RequestError> {
        let response: SubscriptionsResponse =
            self.get("feed_subscriptions", "/feed/subscriptions", &[]).await?;
        Ok(response.subscriptions)
    }
}
