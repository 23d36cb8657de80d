//! Subscription Registry
//!
//! The authoritative local record of what the UI wants pushed.
//!
//! # Design
//!
//! - Local intent is applied first and always succeeds; the backend call
//!   that follows is best-effort. A failed call is reported to the caller
//!   but never rolls the local set back.
//! - [`SubscriptionRegistry::sync_with_backend`] is the only way backend
//!   state flows back in, and it replaces the local set wholesale.
//! - Observers receive the set through a `watch` channel, which coalesces
//!   bursts of mutations into the latest value.

use std::sync::Arc;

use tokio::sync::watch;

use crate::application::ports::{RequestError, SubscriptionBackend};
use crate::domain::instrument::InstrumentKey;
use crate::domain::subscription::{DeliveryMode, SubscriptionSet};

/// Local subscription intent plus the backend it is mirrored to.
pub struct SubscriptionRegistry {
    backend: Arc<dyn SubscriptionBackend>,
    set_tx: watch::Sender<SubscriptionSet>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("set", &*self.set_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(backend: Arc<dyn SubscriptionBackend>, mode: DeliveryMode) -> Self {
        let (set_tx, _) = watch::channel(SubscriptionSet::new(mode));
        Self { backend, set_tx }
    }

    /// Add keys locally, then ask the backend to stream them.
    ///
    /// Returns whether the backend acknowledged. The local set keeps the
    /// keys either way. An empty key list is a no-op that returns `true`.
    pub async fn subscribe(&self, keys: &[InstrumentKey], mode: DeliveryMode) -> bool {
        if keys.is_empty() {
            return true;
        }

        let changed = self.set_tx.send_if_modified(|set| set.insert_all(keys, mode));
        tracing::debug!(count = keys.len(), changed, mode = mode.as_str(), "Subscribing");

        match self.backend.subscribe(keys, mode).await {
            Ok(()) => {
                tracing::info!(count = keys.len(), mode = mode.as_str(), "Subscribed");
                true
            }
            Err(e) => {
                tracing::warn!(count = keys.len(), error = %e, "Backend subscribe failed");
                false
            }
        }
    }

    /// Remove keys locally, then ask the backend to stop streaming them.
    ///
    /// Returns whether the backend acknowledged. The local set keeps the
    /// removal either way. An empty key list is a no-op that returns `true`.
    pub async fn unsubscribe(&self, keys: &[InstrumentKey]) -> bool {
        if keys.is_empty() {
            return true;
        }

        let changed = self.set_tx.send_if_modified(|set| set.remove_all(keys));
        tracing::debug!(count = keys.len(), changed, "Unsubscribing");

        match self.backend.unsubscribe(keys).await {
            Ok(()) => {
                tracing::info!(count = keys.len(), "Unsubscribed");
                true
            }
            Err(e) => {
                tracing::warn!(count = keys.len(), error = %e, "Backend unsubscribe failed");
                false
            }
        }
    }

    /// Replace the local set with an authoritative list.
    ///
    /// Discards local-only keys. Returns `true` if the content changed.
    pub fn replace_all(&self, keys: impl IntoIterator<Item = InstrumentKey>) -> bool {
        self.set_tx.send_if_modified(|set| set.replace(keys))
    }

    /// Fetch the backend's list and adopt it as the local set.
    ///
    /// Returns the number of keys now subscribed.
    ///
    /// # Errors
    ///
    /// Returns the [`RequestError`] from the backend; the local set is left
    /// untouched in that case.
    pub async fn sync_with_backend(&self) -> Result<usize, RequestError> {
        let keys = self.backend.subscriptions().await.inspect_err(|e| {
            tracing::warn!(error = %e, "Subscription sync failed");
        })?;

        let changed = self.replace_all(keys);
        let count = self.set_tx.borrow().len();
        tracing::info!(count, changed, "Subscriptions synced with backend");
        Ok(count)
    }

    /// Copy of the current set.
    #[must_use]
    pub fn snapshot(&self) -> SubscriptionSet {
        self.set_tx.borrow().clone()
    }

    /// Whether a key is in the local set.
    #[must_use]
    pub fn contains(&self, key: &InstrumentKey) -> bool {
        self.set_tx.borrow().contains(key)
    }

    /// Observe the set; the receiver sees the current value immediately.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SubscriptionSet> {
        self.set_tx.subscribe()
    }
}
