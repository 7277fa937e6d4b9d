//! In-process [`DataStore`] implementation.
//!
//! Holds records per `(view, key)` and fans out appear/disappear
//! transitions to every subscription whose pattern the key matches.
//! Supports read-failure injection so error paths can be exercised.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use ldh_types::{ResourceKey, SubscriptionId, View};

use crate::store::{DataStore, Record, StoreError, WildcardListener};

/// Thread-safe in-memory store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    /// Records and subscriptions.
    inner: RwLock<StoreInner>,
    /// When set, every [`DataStore::read`] fails.
    fail_reads: AtomicBool,
}

/// State behind the lock.
#[derive(Debug, Default)]
struct StoreInner {
    /// Records keyed by view, then key.
    records: BTreeMap<(View, ResourceKey), Record>,
    /// Live subscriptions.
    subscriptions: HashMap<SubscriptionId, WildcardListener>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `record` at `key` under `view`. Returns the previous record.
    ///
    /// Creating a key notifies matching subscriptions; overwriting does not.
    pub fn put(&self, view: View, key: impl Into<ResourceKey>, record: Record) -> Option<Record> {
        let key = key.into();
        let (previous, listeners) = {
            let mut inner = self.write();
            let previous = inner.records.insert((view, key.clone()), record);
            let listeners = if previous.is_none() {
                inner.matching(view, &key)
            } else {
                Vec::new()
            };
            (previous, listeners)
        };
        for listener in listeners {
            listener.appeared(&key);
        }
        previous
    }

    /// Delete `key` under `view`. Returns the removed record.
    ///
    /// Deleting an existing key notifies matching subscriptions.
    pub fn delete(&self, view: View, key: impl Into<ResourceKey>) -> Option<Record> {
        let key = key.into();
        let (removed, listeners) = {
            let mut inner = self.write();
            let removed = inner.records.remove(&(view, key.clone()));
            let listeners = if removed.is_some() {
                inner.matching(view, &key)
            } else {
                Vec::new()
            };
            (removed, listeners)
        };
        for listener in listeners {
            listener.disappeared(&key);
        }
        removed
    }

    /// Number of records across all views.
    pub fn len(&self) -> usize {
        self.read_lock().records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.read_lock().subscriptions.len()
    }

    /// Make every subsequent read fail (or succeed again).
    pub fn set_read_failure(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Release);
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, StoreInner> {
        // Poisoning only means a writer panicked mid-update of plain maps.
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoreInner> {
        self.inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl StoreInner {
    /// Listeners of every subscription on `view` whose pattern covers `key`.
    fn matching(&self, view: View, key: &ResourceKey) -> Vec<WildcardListener> {
        self.subscriptions
            .values()
            .filter(|l| l.view() == view && key.matches(l.pattern()))
            .cloned()
            .collect()
    }
}

impl DataStore for InMemoryStore {
    fn read(&self, key: &ResourceKey, view: View) -> Result<Option<Record>, StoreError> {
        if self.fail_reads.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable {
                reason: "read failure injected".to_owned(),
            });
        }
        Ok(self.read_lock().records.get(&(view, key.clone())).cloned())
    }

    fn subscribe(
        &self,
        pattern: &ResourceKey,
        view: View,
        listener: WildcardListener,
    ) -> Result<(), StoreError> {
        let existing: Vec<ResourceKey> = {
            let mut inner = self.write();
            inner
                .subscriptions
                .insert(listener.subscription(), listener.clone());
            inner
                .records
                .keys()
                .filter(|(v, k)| *v == view && k.matches(pattern))
                .map(|(_, k)| k.clone())
                .collect()
        };
        for key in &existing {
            listener.appeared(key);
        }
        tracing::debug!(
            pattern = %pattern,
            view = %view,
            replayed = existing.len(),
            "subscription established"
        );
        Ok(())
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        if self.write().subscriptions.remove(&subscription).is_none() {
            tracing::debug!(%subscription, "unsubscribe of unknown subscription");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ldh_types::Presence;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;

    fn listener(
        pattern: &str,
        view: View,
    ) -> (
        WildcardListener,
        mpsc::UnboundedReceiver<crate::store::WildcardNotification>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            WildcardListener::new(SubscriptionId::new(), view, ResourceKey::new(pattern), tx),
            rx,
        )
    }

    #[test]
    fn put_read_delete() {
        let store = InMemoryStore::new();
        let key = ResourceKey::new("/vpn/blue");
        assert_eq!(store.read(&key, View::Desired).unwrap(), None);

        assert!(store.put(View::Desired, key.clone(), json!({"rd": "1:1"})).is_none());
        assert_eq!(
            store.read(&key, View::Desired).unwrap(),
            Some(json!({"rd": "1:1"}))
        );
        assert_eq!(store.read(&key, View::Observed).unwrap(), None);

        assert!(store.delete(View::Desired, key.clone()).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn subscribe_replays_existing_members() {
        let store = InMemoryStore::new();
        let _ = store.put(View::Desired, "/vpn/blue", json!({}));
        let _ = store.put(View::Desired, "/vpn/red", json!({}));
        let _ = store.put(View::Observed, "/vpn/green", json!({}));

        let (l, mut rx) = listener("/vpn/*", View::Desired);
        store.subscribe(&ResourceKey::new("/vpn/*"), View::Desired, l).unwrap();

        let mut replayed = vec![rx.try_recv().unwrap().key, rx.try_recv().unwrap().key];
        replayed.sort();
        assert_eq!(
            replayed,
            vec![ResourceKey::new("/vpn/blue"), ResourceKey::new("/vpn/red")]
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn transitions_reach_matching_subscriptions_only() {
        let store = InMemoryStore::new();
        let (l, mut rx) = listener("/vpn/*", View::Desired);
        let id = l.subscription();
        store.subscribe(&ResourceKey::new("/vpn/*"), View::Desired, l).unwrap();

        let _ = store.put(View::Desired, "/vpn/blue", json!({}));
        let _ = store.put(View::Desired, "/vpn/blue", json!({"changed": true}));
        let _ = store.put(View::Desired, "/routes/r1", json!({}));
        let _ = store.delete(View::Desired, "/vpn/blue");

        let appeared = rx.try_recv().unwrap();
        assert_eq!(appeared.presence, Presence::Appeared);
        let gone = rx.try_recv().unwrap();
        assert_eq!(gone.presence, Presence::Disappeared);
        assert!(rx.try_recv().is_err());

        store.unsubscribe(id);
        assert_eq!(store.subscription_count(), 0);
        let _ = store.put(View::Desired, "/vpn/red", json!({}));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn injected_read_failure() {
        let store = InMemoryStore::new();
        store.set_read_failure(true);
        assert!(matches!(
            store.read(&ResourceKey::new("/a"), View::Desired),
            Err(StoreError::Unavailable { .. })
        ));
        store.set_read_failure(false);
        assert!(store.read(&ResourceKey::new("/a"), View::Desired).is_ok());
    }
}
