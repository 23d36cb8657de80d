//! Canonical Stores
//!
//! One store per feed, holding the merged record for every key seen so far.
//! The store is the only writer of its records: each fragment is merged and
//! the result replaces the previous record under a single write lock, so
//! readers never observe an intermediate state.
//!
//! Readers either take point reads ([`CanonicalStore::get`],
//! [`CanonicalStore::snapshot`]) or subscribe to a broadcast of every
//! replaced record.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::domain::merge::{merge, Feed, FragmentOf, Keyed};

/// Default capacity of the update broadcast.
pub const DEFAULT_UPDATES_CAPACITY: usize = 1024;

/// A record that was just replaced.
#[derive(Debug, Clone)]
pub struct StoreUpdate<F: Feed> {
    /// Record key.
    pub key: F::Key,
    /// New record.
    pub record: F::Record,
}

/// Merged per-key records of one feed.
#[derive(Debug)]
pub struct CanonicalStore<F: Feed> {
    records: RwLock<HashMap<F::Key, F::Record>>,
    updates_tx: broadcast::Sender<StoreUpdate<F>>,
}

/// Shared store reference.
pub type SharedStore<F> = Arc<CanonicalStore<F>>;

impl<F: Feed> CanonicalStore<F> {
    /// Create an empty store with the given update broadcast capacity.
    #[must_use]
    pub fn new(updates_capacity: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            updates_tx: broadcast::channel(updates_capacity.max(1)).0,
        }
    }

    /// Create an empty store with the default capacity.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_UPDATES_CAPACITY)
    }

    /// Merge fragments in order and publish each replaced record.
    ///
    /// Returns the number of records replaced.
    pub fn apply(
        &self,
        fragments: Vec<Keyed<F::Key, FragmentOf<F>>>,
        observed_at: DateTime<Utc>,
    ) -> usize {
        let mut updates = Vec::with_capacity(fragments.len());
        {
            let mut records = self.records.write();
            for Keyed { key, fragment } in fragments {
                let next = merge(records.get(&key), &fragment, observed_at);
                records.insert(key.clone(), next.clone());
                updates.push(StoreUpdate { key, record: next });
            }
        }

        let applied = updates.len();
        for update in updates {
            // No receivers is fine; readers may poll instead.
            let _ = self.updates_tx.send(update);
        }
        applied
    }

    /// Current record for a key.
    #[must_use]
    pub fn get(&self, key: &F::Key) -> Option<F::Record> {
        self.records.read().get(key).cloned()
    }

    /// Copy of every record.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<F::Key, F::Record> {
        self.records.read().clone()
    }

    /// Number of keys with a record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether no record exists yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Receive every replaced record from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoreUpdate<F>> {
        self.updates_tx.subscribe()
    }

    /// Number of active update receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.updates_tx.receiver_count()
    }
}

impl<F: Feed> Default for CanonicalStore<F> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::domain::instrument::InstrumentKey;
    use crate::domain::merge::{QuoteFeed, QuoteFragment};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn ltp(key: &str, value: f64) -> Keyed<InstrumentKey, QuoteFragment> {
        Keyed::new(
            InstrumentKey::new(key),
            QuoteFragment {
                ltp: Some(value),
                ..QuoteFragment::default()
            },
        )
    }

    #[test]
    fn records_are_created_lazily() {
        let store = CanonicalStore::<QuoteFeed>::with_defaults();
        assert!(store.is_empty());

        store.apply(vec![ltp("A", 101.0)], at(1));

        assert_eq!(store.len(), 1);
        assert!(store.get(&InstrumentKey::new("B")).is_none());
        let a = store.get(&InstrumentKey::new("A")).unwrap();
        assert!((a.ltp - 101.0).abs() < f64::EPSILON);
    }

    #[test]
    fn fragments_for_same_key_apply_in_order() {
        let store = CanonicalStore::<QuoteFeed>::with_defaults();

        let applied = store.apply(vec![ltp("A", 100.0), ltp("A", 102.0)], at(1));

        assert_eq!(applied, 2);
        let a = store.get(&InstrumentKey::new("A")).unwrap();
        assert!((a.ltp - 102.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn subscribers_receive_replaced_records() {
        let store = CanonicalStore::<QuoteFeed>::with_defaults();
        let mut rx = store.subscribe();
        assert_eq!(store.receiver_count(), 1);

        store.apply(vec![ltp("A", 99.5)], at(3));

        let update = rx.recv().await.unwrap();
        assert_eq!(update.key.as_str(), "A");
        assert_eq!(update.record.observed_at, at(3));
    }

    #[test]
    fn apply_without_receivers_still_stores() {
        let store = CanonicalStore::<QuoteFeed>::new(0);
        store.apply(vec![ltp("A", 1.0)], at(1));
        assert_eq!(store.snapshot().len(), 1);
    }
}
