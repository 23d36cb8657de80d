//! Feed Sync Session
//!
//! Composition root: one backend client, one registry, four stream channels
//! with their stores, and the synchronizer that keeps the subscription-driven
//! channels (live quotes, candles, VWAP) in step with the registry.
//!
//! ```text
//! subscribe ──► Registry ──watch──► Synchronizer ──open/close──► Channels
//!                  │                                               │
//!                  └──► Backend REST          SSE ──► merge ──► Stores
//! ```
//!
//! The order channel is not subscription-driven; callers open it with
//! [`FeedSync::open_orders`].

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    ChannelControl, RequestError, StreamTransport, SubscriptionBackend,
};
use crate::application::services::{
    CanonicalStore, HistoryStore, SharedStore, SubscriptionRegistry, Synchronizer,
};
use crate::domain::channel::{ChannelKind, ConnectionState};
use crate::domain::instrument::InstrumentKey;
use crate::domain::merge::{CandleFeed, Feed, OrderFeed, QuoteFeed, VwapFeed};
use crate::domain::subscription::{DeliveryMode, SubscriptionSet};
use crate::infrastructure::backend::{BackendClient, HistoryQuery};
use crate::infrastructure::config::{ConfigError, SyncConfig, load_dotenv};
use crate::infrastructure::metrics;
use crate::infrastructure::sse::HttpSseTransport;
use crate::infrastructure::stream::{ReconnectConfig, StreamChannel};

/// Session startup failures.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Configuration was invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// An HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] RequestError),
    /// Started outside a Tokio runtime.
    #[error("feed sync must be started inside a Tokio runtime")]
    NoRuntime,
}

/// Running sync layer.
pub struct FeedSync {
    config: SyncConfig,
    backend: Arc<BackendClient>,
    registry: Arc<SubscriptionRegistry>,
    synchronizer: Arc<Synchronizer>,
    quotes: Arc<StreamChannel<QuoteFeed>>,
    candles: Arc<StreamChannel<CandleFeed>>,
    vwap: Arc<StreamChannel<VwapFeed>>,
    orders: Arc<StreamChannel<OrderFeed>>,
    history: Arc<HistoryStore>,
    cancel: CancellationToken,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for FeedSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSync")
            .field("api_root", &self.backend.api_root())
            .field("subscriptions", &self.registry.snapshot().len())
            .field("channels", &self.channel_states())
            .finish_non_exhaustive()
    }
}

impl FeedSync {
    /// Load `.env` and the environment, then start.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid, a client cannot be
    /// built, or no Tokio runtime is running.
    pub fn from_env() -> Result<Self, SessionError> {
        load_dotenv();
        let config = SyncConfig::from_env()?;
        Self::start(config)
    }

    /// Build every component and spawn the synchronizer.
    ///
    /// Channels stay idle until the first subscription (or
    /// [`open_orders`](Self::open_orders)).
    ///
    /// # Errors
    ///
    /// Returns an error if a client cannot be built or no Tokio runtime is
    /// running.
    pub fn start(config: SyncConfig) -> Result<Self, SessionError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SessionError::NoRuntime)?;
        config.log();
        metrics::describe_metrics();

        let backend = Arc::new(BackendClient::new(&config.api)?);
        let stream_client = reqwest::Client::builder()
            .build()
            .map_err(|e| RequestError::Network(e.to_string()))?;
        let transport: Arc<dyn StreamTransport> =
            Arc::new(HttpSseTransport::new(stream_client, config.api.api_root()));

        let reconnect = ReconnectConfig::new(config.stream.reconnect_delay);
        let capacity = config.stream.store_updates_capacity;
        let quotes = Arc::new(channel::<QuoteFeed>(&transport, reconnect, capacity));
        let candles = Arc::new(channel::<CandleFeed>(&transport, reconnect, capacity));
        let vwap = Arc::new(channel::<VwapFeed>(&transport, reconnect, capacity));
        let orders = Arc::new(channel::<OrderFeed>(&transport, reconnect, capacity));

        let registry = Arc::new(SubscriptionRegistry::new(
            Arc::clone(&backend) as Arc<dyn SubscriptionBackend>,
            config.stream.delivery_mode,
        ));
        let synchronizer = Arc::new(Synchronizer::new(vec![
            Arc::clone(&quotes) as Arc<dyn ChannelControl>,
            Arc::clone(&candles) as Arc<dyn ChannelControl>,
            Arc::clone(&vwap) as Arc<dyn ChannelControl>,
        ]));

        let cancel = CancellationToken::new();
        let sync_task = runtime.spawn(
            Arc::clone(&synchronizer).run(registry.watch(), cancel.child_token()),
        );

        tracing::info!(api_root = %backend.api_root(), "Feed sync started");

        Ok(Self {
            config,
            backend,
            registry,
            synchronizer,
            quotes,
            candles,
            vwap,
            orders,
            history: Arc::new(HistoryStore::new()),
            cancel,
            sync_task: Mutex::new(Some(sync_task)),
        })
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe with the configured delivery mode.
    ///
    /// Returns whether the backend acknowledged; streams follow the local
    /// set either way.
    pub async fn subscribe(&self, keys: &[InstrumentKey]) -> bool {
        self.subscribe_with_mode(keys, self.config.stream.delivery_mode)
            .await
    }

    /// Subscribe with an explicit delivery mode.
    pub async fn subscribe_with_mode(&self, keys: &[InstrumentKey], mode: DeliveryMode) -> bool {
        let acknowledged = self.registry.subscribe(keys, mode).await;
        metrics::set_subscriptions(self.registry.snapshot().len());
        acknowledged
    }

    /// Unsubscribe. Returns whether the backend acknowledged.
    pub async fn unsubscribe(&self, keys: &[InstrumentKey]) -> bool {
        let acknowledged = self.registry.unsubscribe(keys).await;
        metrics::set_subscriptions(self.registry.snapshot().len());
        acknowledged
    }

    /// Replace the local set with the backend's list.
    ///
    /// # Errors
    ///
    /// Returns the backend error; the local set is unchanged in that case.
    pub async fn sync_subscriptions(&self) -> Result<usize, RequestError> {
        let count = self.registry.sync_with_backend().await?;
        metrics::set_subscriptions(count);
        Ok(count)
    }

    /// Current local subscription set.
    #[must_use]
    pub fn subscriptions(&self) -> SubscriptionSet {
        self.registry.snapshot()
    }

    // =========================================================================
    // Channel control
    // =========================================================================

    /// Open the order-update channel.
    pub fn open_orders(&self) {
        self.orders.open(None);
    }

    /// Close the order-update channel.
    pub fn close_orders(&self) {
        self.orders.close();
    }

    /// Close every channel. Subscriptions are kept.
    ///
    /// The next subscription change (or [`resume`](Self::resume)) reopens the
    /// subscription-driven channels.
    pub fn close_all(&self) {
        self.synchronizer.close_all();
        self.orders.close();
    }

    /// Reopen the subscription-driven channels for the current set.
    pub fn resume(&self) {
        let outcome = self.synchronizer.reconcile(&self.registry.snapshot());
        tracing::debug!(opened = outcome.opened, closed = outcome.closed, "Channels resumed");
    }

    /// Current state of every channel.
    #[must_use]
    pub fn channel_states(&self) -> Vec<(ChannelKind, ConnectionState)> {
        vec![
            (QuoteFeed::KIND, self.quotes.state()),
            (CandleFeed::KIND, self.candles.state()),
            (VwapFeed::KIND, self.vwap.state()),
            (OrderFeed::KIND, self.orders.state()),
        ]
    }

    /// Observe one channel's state.
    #[must_use]
    pub fn watch_state(&self, kind: ChannelKind) -> watch::Receiver<ConnectionState> {
        match kind {
            ChannelKind::LiveQuote => self.quotes.watch_state(),
            ChannelKind::Candle => self.candles.watch_state(),
            ChannelKind::Vwap => self.vwap.watch_state(),
            ChannelKind::OrderUpdate => self.orders.watch_state(),
        }
    }

    // =========================================================================
    // History
    // =========================================================================

    /// Fetch one instrument's history into the history store.
    ///
    /// Returns the number of candles stored; zero on fetch failure.
    pub async fn load_history(&self, key: &InstrumentKey, query: &HistoryQuery) -> usize {
        let candles = self.backend.history_candles(key, query).await;
        let count = candles.len();
        self.history.replace(key.clone(), &query.interval, candles);
        count
    }

    /// Fetch history for every backend subscription into the history store.
    ///
    /// Returns the number of instruments stored.
    pub async fn load_subscribed_history(&self, query: &HistoryQuery) -> usize {
        let history = self.backend.subscribed_history(query).await;
        let count = history.len();
        for (key, candles) in history {
            self.history.replace(key, &query.interval, candles);
        }
        count
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Live quote records.
    #[must_use]
    pub fn quotes(&self) -> &SharedStore<QuoteFeed> {
        self.quotes.store()
    }

    /// Candle records.
    #[must_use]
    pub fn candles(&self) -> &SharedStore<CandleFeed> {
        self.candles.store()
    }

    /// VWAP records.
    #[must_use]
    pub fn vwap(&self) -> &SharedStore<VwapFeed> {
        self.vwap.store()
    }

    /// Order-update records.
    #[must_use]
    pub fn orders(&self) -> &SharedStore<OrderFeed> {
        self.orders.store()
    }

    /// Historical candles.
    #[must_use]
    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// Backend client for order, GTT and portfolio calls.
    #[must_use]
    pub fn backend(&self) -> &BackendClient {
        &self.backend
    }

    /// Subscription registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Stop the synchronizer and close every channel.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.sync_task.lock().take() {
            task.abort();
        }
        self.close_all();
        tracing::info!("Feed sync stopped");
    }
}

impl Drop for FeedSync {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.sync_task.lock().take() {
            task.abort();
        }
    }
}

fn channel<F: Feed>(
    transport: &Arc<dyn StreamTransport>,
    reconnect: ReconnectConfig,
    capacity: usize,
) -> StreamChannel<F> {
    StreamChannel::new(
        Arc::clone(transport),
        Arc::new(CanonicalStore::new(capacity)),
        reconnect,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_requires_runtime() {
        let result = FeedSync::start(SyncConfig::default());
        assert!(matches!(result, Err(SessionError::NoRuntime)));
    }

    #[tokio::test]
    async fn starts_idle_with_empty_set() {
        let sync = FeedSync::start(SyncConfig::default()).unwrap();

        assert!(sync.subscriptions().is_empty());
        assert!(
            sync.channel_states()
                .iter()
                .all(|(_, state)| *state == ConnectionState::Idle)
        );
        assert!(sync.quotes().is_empty());
        assert_eq!(sync.backend().api_root(), "http://localhost:8000/api/v1");
    }

    #[tokio::test]
    async fn close_all_closes_every_channel() {
        let sync = FeedSync::start(SyncConfig::default()).unwrap();
        sync.close_all();

        assert!(
            sync.channel_states()
                .iter()
                .all(|(_, state)| *state == ConnectionState::Closed)
        );
        sync.shutdown();
    }
}
