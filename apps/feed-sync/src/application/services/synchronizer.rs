//! Subscription-to-Stream Synchronizer
//!
//! Keeps each filter-sensitive channel's filter equal to the current
//! subscription set.
//!
//! # Reconciliation
//!
//! For every channel, on every observed set change:
//! - empty set: close the channel, if a filter had been applied
//! - set differs in content from the last applied filter: `open(new)`
//! - same content (any order): nothing
//!
//! The transport cannot change an open connection's filter, so every
//! filter change is a full reconnect. Observing the set through a `watch`
//! channel coalesces bursts of mutations, and content comparison filters
//! out no-op changes, so a burst ending in an unchanged set reconnects
//! nothing and a burst ending in a new set reconnects once.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::application::ports::ChannelControl;
use crate::domain::channel::ChannelKind;
use crate::domain::instrument::InstrumentFilter;
use crate::domain::subscription::SubscriptionSet;

/// What one reconcile pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Channels reopened with a new filter.
    pub opened: usize,
    /// Channels closed for an empty set.
    pub closed: usize,
}

impl ReconcileOutcome {
    /// Whether nothing was done.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.opened == 0 && self.closed == 0
    }
}

/// Drives channel filters from the subscription set.
pub struct Synchronizer {
    channels: Vec<Arc<dyn ChannelControl>>,
    applied: Mutex<HashMap<ChannelKind, InstrumentFilter>>,
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<_> = self.channels.iter().map(|c| c.kind()).collect();
        f.debug_struct("Synchronizer")
            .field("channels", &kinds)
            .field("applied", &*self.applied.lock())
            .finish()
    }
}

impl Synchronizer {
    /// Create a synchronizer over the given channels.
    #[must_use]
    pub fn new(channels: Vec<Arc<dyn ChannelControl>>) -> Self {
        Self {
            channels,
            applied: Mutex::new(HashMap::new()),
        }
    }

    /// Bring every channel's filter in line with `set`.
    pub fn reconcile(&self, set: &SubscriptionSet) -> ReconcileOutcome {
        let target = set.filter();
        let mut outcome = ReconcileOutcome::default();
        let mut applied = self.applied.lock();

        for channel in &self.channels {
            let kind = channel.kind();
            let previous = applied.get(&kind);

            if target.is_empty() {
                if previous.is_some_and(|filter| !filter.is_empty()) {
                    tracing::info!(channel = %kind, "Subscription set empty, closing channel");
                    channel.close();
                    applied.insert(kind, InstrumentFilter::new());
                    outcome.closed += 1;
                }
                continue;
            }

            if previous == Some(target) {
                tracing::trace!(channel = %kind, "Filter unchanged");
                continue;
            }

            tracing::info!(
                channel = %kind,
                instruments = target.len(),
                "Filter changed, reopening channel"
            );
            channel.open(Some(target.clone()));
            applied.insert(kind, target.clone());
            outcome.opened += 1;
        }
        drop(applied);

        outcome
    }

    /// Close every channel and forget applied filters, so the next reconcile
    /// reopens every channel.
    ///
    /// Holds the same lock as [`reconcile`](Self::reconcile): a concurrent
    /// reconcile runs entirely before or entirely after this.
    pub fn close_all(&self) {
        let mut applied = self.applied.lock();
        for channel in &self.channels {
            channel.close();
        }
        applied.clear();
        drop(applied);
        tracing::info!(channels = self.channels.len(), "Closed all synchronized channels");
    }

    /// Last filter applied to a channel, if any.
    #[must_use]
    pub fn applied_filter(&self, kind: ChannelKind) -> Option<InstrumentFilter> {
        self.applied.lock().get(&kind).cloned()
    }

    /// Reconcile on every set change until cancelled or the registry is gone.
    pub async fn run(
        self: Arc<Self>,
        mut set_rx: watch::Receiver<SubscriptionSet>,
        cancel: CancellationToken,
    ) {
        tracing::info!(channels = self.channels.len(), "Synchronizer started");

        let initial = set_rx.borrow_and_update().clone();
        self.reconcile(&initial);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Synchronizer shutdown requested");
                    break;
                }
                changed = set_rx.changed() => {
                    if changed.is_err() {
                        tracing::debug!("Subscription registry dropped, synchronizer exiting");
                        break;
                    }
                    let set = set_rx.borrow_and_update().clone();
                    let outcome = self.reconcile(&set);
                    tracing::debug!(
                        opened = outcome.opened,
                        closed = outcome.closed,
                        "Reconciled subscription change"
                    );
                }
            }
        }
    }
}
