//! Stream Channel
//!
//! Owns at most one live push connection for one feed and delivers its
//! decoded fragments to the feed's canonical store.
//!
//! # Lifecycle
//!
//! ```text
//!            open                 handshake ok
//! Idle ──────────────► Connecting ─────────────► Open
//!   ▲                    ▲    │                   │
//!   │                    │    │ error             │ error / stream end
//!   │          delay     │    ▼                   │
//!   │                    └── Degraded ◄───────────┘
//!   │
//!   └──── any state ──── close ────► Closed
//! ```
//!
//! Every `open` or `close` bumps a generation counter and cancels the current
//! worker (pending handshake, live stream and reconnect timer alike). A
//! worker may only touch channel state or the store while the generation it
//! was spawned with is still current.
//!
//! Cancellation takes effect at the worker's next poll, so a superseded
//! connection can still be open for a moment after `open` or `close` returns.
//! It is invisible to callers: its state changes and store writes are
//! rejected by the generation check.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{
    ChannelControl, SseEvent, StreamRequest, StreamTransport, TransportError,
};
use crate::application::services::SharedStore;
use crate::domain::channel::{ChannelKind, ConnectionState, FilterPolicy};
use crate::domain::instrument::InstrumentFilter;
use crate::domain::merge::Feed;
use crate::infrastructure::metrics;

// =============================================================================
// Channel
// =============================================================================

/// Push connection lifecycle for one feed.
pub struct StreamChannel<F: Feed> {
    shared: Arc<ChannelShared<F>>,
}

struct ChannelShared<F: Feed> {
    transport: Arc<dyn StreamTransport>,
    store: SharedStore<F>,
    reconnect: ReconnectConfig,
    inner: Mutex<ChannelInner>,
    state_tx: watch::Sender<ConnectionState>,
}

#[derive(Default)]
struct ChannelInner {
    generation: u64,
    filter: Option<InstrumentFilter>,
    worker: Option<Worker>,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Signal the worker and schedule its task for abort. Does not wait for
    /// the task to finish.
    fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

impl<F: Feed> std::fmt::Debug for StreamChannel<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("StreamChannel")
            .field("kind", &F::KIND)
            .field("state", &*self.shared.state_tx.borrow())
            .field("generation", &inner.generation)
            .field("filter", &inner.filter)
            .finish_non_exhaustive()
    }
}

impl<F: Feed> StreamChannel<F> {
    /// Create an idle channel.
    #[must_use]
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        store: SharedStore<F>,
        reconnect: ReconnectConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            shared: Arc::new(ChannelShared {
                transport,
                store,
                reconnect,
                inner: Mutex::new(ChannelInner::default()),
                state_tx,
            }),
        }
    }

    /// Channel kind.
    #[must_use]
    pub const fn kind(&self) -> ChannelKind {
        F::KIND
    }

    /// Tear down any current connection and connect with `filter`.
    ///
    /// The previous worker is signalled before this returns and can no longer
    /// change state or write to the store. A channel
    /// whose kind requires a filter goes straight to `Closed` when `filter`
    /// is absent or empty. Must be called from within a Tokio runtime.
    pub fn open(&self, filter: Option<InstrumentFilter>) {
        let mut inner = self.shared.inner.lock();
        inner.generation = inner.generation.wrapping_add(1);
        let generation = inner.generation;
        if let Some(worker) = inner.worker.take() {
            worker.stop();
        }

        let filter = match F::KIND.filter_policy() {
            FilterPolicy::Never => None,
            FilterPolicy::Optional => filter.filter(|keys| !keys.is_empty()),
            FilterPolicy::Required => {
                if let Some(keys) = filter.filter(|keys| !keys.is_empty()) {
                    Some(keys)
                } else {
                    tracing::info!(
                        channel = %F::KIND,
                        generation,
                        "No instruments to stream, channel closed"
                    );
                    inner.filter = None;
                    self.shared.set_state(ConnectionState::Closed);
                    return;
                }
            }
        };
        inner.filter.clone_from(&filter);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(
                channel = %F::KIND,
                "Channel opened outside a Tokio runtime, channel closed"
            );
            self.shared.set_state(ConnectionState::Closed);
            return;
        };

        tracing::info!(
            channel = %F::KIND,
            generation,
            instruments = filter.as_ref().map_or(0, InstrumentFilter::len),
            "Opening stream channel"
        );
        self.shared.set_state(ConnectionState::Connecting);

        let cancel = CancellationToken::new();
        let request = StreamRequest {
            kind: F::KIND,
            filter,
        };
        let handle = runtime.spawn(Arc::clone(&self.shared).run(generation, request, cancel.clone()));
        inner.worker = Some(Worker { cancel, handle });
    }

    /// Tear down the connection and cancel any pending reconnect.
    pub fn close(&self) {
        let mut inner = self.shared.inner.lock();
        inner.generation = inner.generation.wrapping_add(1);
        if let Some(worker) = inner.worker.take() {
            worker.stop();
        }
        tracing::info!(
            channel = %F::KIND,
            generation = inner.generation,
            "Stream channel closed"
        );
        self.shared.set_state(ConnectionState::Closed);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Observe connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Filter of the current (or most recent) open.
    #[must_use]
    pub fn filter(&self) -> Option<InstrumentFilter> {
        self.shared.inner.lock().filter.clone()
    }

    /// Number of `open`/`close` calls so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.inner.lock().generation
    }

    /// Store this channel writes into.
    #[must_use]
    pub fn store(&self) -> &SharedStore<F> {
        &self.shared.store
    }
}

impl<F: Feed> Drop for StreamChannel<F> {
    fn drop(&mut self) {
        if let Some(worker) = self.shared.inner.lock().worker.take() {
            worker.stop();
        }
    }
}

impl<F: Feed> ChannelControl for StreamChannel<F> {
    fn kind(&self) -> ChannelKind {
        F::KIND
    }

    fn open(&self, filter: Option<InstrumentFilter>) {
        Self::open(self, filter);
    }

    fn close(&self) {
        Self::close(self);
    }

    fn state(&self) -> ConnectionState {
        Self::state(self)
    }
}

// =============================================================================
// Worker
// =============================================================================

impl<F: Feed> ChannelShared<F> {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
        metrics::set_channel_state(F::KIND, state);
    }

    /// Apply a transition only if `generation` is still current.
    fn transition(&self, generation: u64, state: ConnectionState) -> bool {
        let inner = self.inner.lock();
        if inner.generation != generation {
            return false;
        }
        self.set_state(state);
        true
    }

    /// Connect, pump events and reconnect until cancelled.
    async fn run(self: Arc<Self>, generation: u64, request: StreamRequest, cancel: CancellationToken) {
        let mut policy = ReconnectPolicy::new(self.reconnect);

        loop {
            if cancel.is_cancelled() {
                return;
            }

            let error = tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!(channel = %F::KIND, generation, "Channel worker cancelled");
                    return;
                }
                error = self.connect_and_run(generation, &request, &mut policy) => error,
            };

            if !self.transition(generation, ConnectionState::Degraded) {
                return;
            }

            let delay = policy.next_delay();
            tracing::warn!(
                channel = %F::KIND,
                generation,
                error = %error,
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Stream connection lost, reconnecting"
            );
            metrics::record_transport_error(F::KIND, error.error_type());
            metrics::record_reconnect(F::KIND);

            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!(
                        channel = %F::KIND,
                        generation,
                        "Channel worker cancelled during reconnect delay"
                    );
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }

            if !self.transition(generation, ConnectionState::Connecting) {
                return;
            }
        }
    }

    /// Run one connection until it fails. Always returns the failure.
    async fn connect_and_run(
        &self,
        generation: u64,
        request: &StreamRequest,
        policy: &mut ReconnectPolicy,
    ) -> TransportError {
        let mut events = match self.transport.connect(request).await {
            Ok(events) => events,
            Err(e) => return e,
        };

        if !self.transition(generation, ConnectionState::Open) {
            return TransportError::Ended;
        }
        policy.reset();
        tracing::info!(channel = %F::KIND, generation, "Stream channel open");

        while let Some(item) = events.next().await {
            match item {
                Ok(event) => self.handle_event(generation, &event),
                Err(e) => return e,
            }
        }

        TransportError::Ended
    }

    fn handle_event(&self, generation: u64, event: &SseEvent) {
        if event.event != F::KIND.event_name() {
            tracing::trace!(channel = %F::KIND, event = %event.event, "Ignoring event");
            return;
        }

        let started = Instant::now();
        let fragments = match F::decode(&event.data) {
            Ok(fragments) => fragments,
            Err(e) => {
                tracing::debug!(channel = %F::KIND, error = %e, "Dropping undecodable event");
                metrics::record_decode_error(F::KIND);
                return;
            }
        };
        if fragments.is_empty() {
            return;
        }

        let inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        let applied = self.store.apply(fragments, Utc::now());
        drop(inner);

        metrics::record_fragments_applied(F::KIND, applied as u64);
        metrics::set_store_records(F::KIND, self.store.len());
        metrics::record_merge_duration(F::KIND, started.elapsed());
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::EventStream;
    use crate::application::services::CanonicalStore;
    use crate::domain::instrument::InstrumentKey;
    use crate::domain::merge::{CandleFeed, OrderFeed, QuoteFeed};

    enum Script {
        Fail(TransportError),
        Stay(Vec<SseEvent>),
        /// Handshake that never completes.
        Hang,
    }

    struct LiveGuard(Arc<AtomicUsize>);

    impl LiveGuard {
        fn new(live: &Arc<AtomicUsize>) -> Self {
            live.fetch_add(1, Ordering::SeqCst);
            Self(Arc::clone(live))
        }
    }

    impl Drop for LiveGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        scripts: Mutex<VecDeque<Script>>,
        requests: Mutex<Vec<StreamRequest>>,
        live: Arc<AtomicUsize>,
    }

    impl FakeTransport {
        fn scripted(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                ..Self::default()
            })
        }

        fn requests(&self) -> Vec<StreamRequest> {
            self.requests.lock().clone()
        }

        fn live(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StreamTransport for FakeTransport {
        async fn connect(&self, request: &StreamRequest) -> Result<EventStream, TransportError> {
            self.requests.lock().push(request.clone());
            let script = self
                .scripts
                .lock()
                .pop_front()
                .unwrap_or(Script::Stay(Vec::new()));

            match script {
                Script::Fail(e) => Err(e),
                Script::Hang => futures::future::pending().await,
                Script::Stay(events) => {
                    let guard = LiveGuard::new(&self.live);
                    Ok(futures::stream::iter(events.into_iter().map(Ok))
                        .chain(futures::stream::pending())
                        .map(move |item| {
                            let _live = &guard;
                            item
                        })
                        .boxed())
                }
            }
        }
    }

    fn filter(raw: &[&str]) -> InstrumentFilter {
        raw.iter().copied().map(InstrumentKey::from).collect()
    }

    fn channel<F: Feed>(transport: &Arc<FakeTransport>) -> StreamChannel<F> {
        StreamChannel::new(
            Arc::clone(transport) as Arc<dyn StreamTransport>,
            Arc::new(CanonicalStore::<F>::with_defaults()),
            ReconnectConfig::default(),
        )
    }

    async fn wait_for(channel_state: &mut watch::Receiver<ConnectionState>, state: ConnectionState) {
        tokio::time::timeout(Duration::from_secs(60), channel_state.wait_for(|s| *s == state))
            .await
            .unwrap()
            .unwrap();
    }

    fn candle_event(key: &str, close: f64) -> SseEvent {
        SseEvent::named(
            "candle",
            format!(r#"{{"instrument_key": "{key}", "close": {close}, "prev_close": 100.0}}"#),
        )
    }

    #[test]
    fn new_channel_is_idle() {
        let transport = Arc::new(FakeTransport::default());
        let channel = channel::<CandleFeed>(&transport);
        assert_eq!(channel.state(), ConnectionState::Idle);
        assert_eq!(channel.generation(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn open_connects_with_filter_and_merges_events() {
        let transport = FakeTransport::scripted(vec![Script::Stay(vec![candle_event("A", 103.0)])]);
        let channel = channel::<CandleFeed>(&transport);
        let mut updates = channel.store().subscribe();
        let mut state = channel.watch_state();

        channel.open(Some(filter(&["A", "B"])));
        wait_for(&mut state, ConnectionState::Open).await;
        let update = updates.recv().await.unwrap();

        assert_eq!(update.key.as_str(), "A");
        assert!((update.record.close - 103.0).abs() < f64::EPSILON);
        assert_eq!(transport.requests()[0].filter, Some(filter(&["A", "B"])));
        assert_eq!(transport.live(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reopen_replaces_the_live_connection() {
        let transport = Arc::new(FakeTransport::default());
        let channel = channel::<CandleFeed>(&transport);
        let mut state = channel.watch_state();

        channel.open(Some(filter(&["A"])));
        wait_for(&mut state, ConnectionState::Open).await;

        channel.open(Some(filter(&["A", "B"])));
        assert_eq!(channel.state(), ConnectionState::Connecting);
        wait_for(&mut state, ConnectionState::Open).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(transport.requests().len(), 2);
        assert_eq!(transport.live(), 1);
        assert_eq!(channel.filter(), Some(filter(&["A", "B"])));
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_opens_leave_one_connection() {
        let transport = Arc::new(FakeTransport::default());
        let channel = channel::<CandleFeed>(&transport);
        let mut state = channel.watch_state();

        channel.open(Some(filter(&["A"])));
        channel.open(Some(filter(&["B"])));
        channel.open(Some(filter(&["C"])));
        wait_for(&mut state, ConnectionState::Open).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(transport.live(), 1);
        let requests = transport.requests();
        assert_eq!(requests.last().unwrap().filter, Some(filter(&["C"])));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_degrades_then_reconnects_after_delay() {
        let transport =
            FakeTransport::scripted(vec![Script::Fail(TransportError::Connect("refused".into()))]);
        let channel = channel::<CandleFeed>(&transport);
        let mut state = channel.watch_state();

        channel.open(Some(filter(&["A"])));
        wait_for(&mut state, ConnectionState::Degraded).await;
        assert_eq!(transport.requests().len(), 1);

        let degraded_at = tokio::time::Instant::now();
        wait_for(&mut state, ConnectionState::Open).await;

        assert!(degraded_at.elapsed() >= Duration::from_secs(5));
        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].filter, Some(filter(&["A"])));
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_pending_reconnect() {
        let transport =
            FakeTransport::scripted(vec![Script::Fail(TransportError::Status(503))]);
        let channel = channel::<CandleFeed>(&transport);
        let mut state = channel.watch_state();

        channel.open(None);
        wait_for(&mut state, ConnectionState::Degraded).await;
        channel.close();

        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(channel.state(), ConnectionState::Closed);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_open_during_reconnect_delay_wins() {
        let transport =
            FakeTransport::scripted(vec![Script::Fail(TransportError::Ended)]);
        let channel = channel::<CandleFeed>(&transport);
        let mut state = channel.watch_state();

        channel.open(Some(filter(&["A"])));
        wait_for(&mut state, ConnectionState::Degraded).await;
        channel.open(Some(filter(&["B"])));
        wait_for(&mut state, ConnectionState::Open).await;

        tokio::time::sleep(Duration::from_secs(30)).await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].filter, Some(filter(&["B"])));
        assert_eq!(transport.live(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_during_handshake_stays_closed() {
        let transport = FakeTransport::scripted(vec![Script::Hang]);
        let channel = channel::<CandleFeed>(&transport);

        channel.open(Some(filter(&["A"])));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(channel.state(), ConnectionState::Connecting);

        channel.close();
        assert_eq!(channel.state(), ConnectionState::Closed);
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(channel.state(), ConnectionState::Closed);
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(transport.live(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reopen_during_handshake_replaces_it() {
        let transport = FakeTransport::scripted(vec![Script::Hang]);
        let channel = channel::<CandleFeed>(&transport);
        let mut state = channel.watch_state();

        channel.open(Some(filter(&["A"])));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(channel.state(), ConnectionState::Connecting);

        channel.open(Some(filter(&["B"])));
        wait_for(&mut state, ConnectionState::Open).await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].filter, Some(filter(&["B"])));
        assert_eq!(transport.live(), 1);
        assert_eq!(channel.state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_generation_cannot_touch_state_or_store() {
        let transport = Arc::new(FakeTransport::default());
        let channel = channel::<CandleFeed>(&transport);
        let mut state = channel.watch_state();

        channel.open(None);
        wait_for(&mut state, ConnectionState::Open).await;
        let stale = channel.generation();
        channel.close();

        assert!(!channel.shared.transition(stale, ConnectionState::Open));
        channel.shared.handle_event(stale, &candle_event("A", 103.0));

        assert_eq!(channel.state(), ConnectionState::Closed);
        assert_eq!(channel.store().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn required_filter_missing_closes_without_connecting() {
        let transport = Arc::new(FakeTransport::default());
        let channel = channel::<QuoteFeed>(&transport);

        channel.open(Some(InstrumentFilter::new()));
        assert_eq!(channel.state(), ConnectionState::Closed);
        channel.open(None);
        assert_eq!(channel.state(), ConnectionState::Closed);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn order_channel_drops_filter() {
        let transport = Arc::new(FakeTransport::default());
        let channel = channel::<OrderFeed>(&transport);
        let mut state = channel.watch_state();

        channel.open(Some(filter(&["A"])));
        wait_for(&mut state, ConnectionState::Open).await;

        assert_eq!(transport.requests()[0].filter, None);
        assert_eq!(channel.filter(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_and_foreign_events_are_dropped() {
        let transport = FakeTransport::scripted(vec![Script::Stay(vec![
            SseEvent::named("candle", "not json"),
            SseEvent::message(r#"{"instrument_key": "X", "close": 1.0}"#),
            candle_event("A", 101.0),
        ])]);
        let channel = channel::<CandleFeed>(&transport);
        let mut updates = channel.store().subscribe();
        let mut state = channel.watch_state();

        channel.open(None);
        wait_for(&mut state, ConnectionState::Open).await;
        let update = updates.recv().await.unwrap();

        assert_eq!(update.key.as_str(), "A");
        assert_eq!(channel.store().len(), 1);
        assert_eq!(channel.state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_channel_tears_down_connection() {
        let transport = Arc::new(FakeTransport::default());
        let channel = channel::<CandleFeed>(&transport);
        let mut state = channel.watch_state();

        channel.open(None);
        wait_for(&mut state, ConnectionState::Open).await;
        drop(channel);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(transport.live(), 0);
    }
}
