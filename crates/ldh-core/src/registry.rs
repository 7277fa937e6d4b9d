//! Wildcard subscription registry.
//!
//! Listener-based events wait on store subscriptions instead of polling.
//! Subscriptions are shared: every condition with the same `(view,
//! pattern)` rides on one [`WildcardSubscription`], reference counted by
//! the number of waiters registered against it. The first waiter creates
//! it (subscribing to the store), the last one to leave removes it
//! (unsubscribing).
//!
//! Mutation of one subscription is serialized on a striped lock addressed
//! by `(view, pattern)`, so unrelated patterns proceed concurrently. The
//! stripe is held across the store's subscribe call and point reads; the
//! map itself is only locked for short bookkeeping steps.
//!
//! Stores report transitions through [`WildcardListener`], which queues a
//! notification for the engine. The engine feeds them back through
//! [`WildcardRegistry::apply_notification`] on its next tick.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ldh_types::{DependencyCondition, Presence, ResourceKey, SubscriptionId, View};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, warn};

use crate::locks::StripedLocks;
use crate::store::{DataStore, WildcardListener, WildcardNotification};

/// Identity of a shared subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionKey {
    /// Store partition watched.
    pub view: View,
    /// Pattern watched.
    pub pattern: ResourceKey,
}

impl SubscriptionKey {
    /// The subscription a condition waits on.
    pub fn of(condition: &DependencyCondition) -> Self {
        Self {
            view: condition.view,
            pattern: condition.pattern.clone(),
        }
    }
}

/// One event waiting on one condition.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Waiter {
    /// The waiting event's key.
    key: ResourceKey,
    /// The waiting event's sequence.
    seq: u64,
    /// The condition it waits on.
    condition: DependencyCondition,
}

/// A live, shared subscription.
#[derive(Debug)]
struct WildcardSubscription {
    /// Store-side identifier.
    id: SubscriptionId,
    /// Number of registered waiters.
    ref_count: usize,
    /// Waiters blocked until a target appears, by target.
    waiting_for_appear: HashMap<ResourceKey, Vec<Waiter>>,
    /// Waiters blocked until a target disappears, by target.
    waiting_for_disappear: HashMap<ResourceKey, Vec<Waiter>>,
}

impl WildcardSubscription {
    fn new(id: SubscriptionId) -> Self {
        Self {
            id,
            ref_count: 0,
            waiting_for_appear: HashMap::new(),
            waiting_for_disappear: HashMap::new(),
        }
    }

    fn waiters_mut(&mut self, expect_present: bool) -> &mut HashMap<ResourceKey, Vec<Waiter>> {
        if expect_present {
            &mut self.waiting_for_appear
        } else {
            &mut self.waiting_for_disappear
        }
    }

    fn add(&mut self, waiter: Waiter) {
        let target = waiter.condition.target.clone();
        self.waiters_mut(waiter.condition.expect_present)
            .entry(target)
            .or_default()
            .push(waiter);
        self.ref_count = self.ref_count.saturating_add(1);
    }

    /// Remove the matching waiter. Returns whether one was found.
    fn remove(&mut self, key: &ResourceKey, seq: u64, condition: &DependencyCondition) -> bool {
        let map = self.waiters_mut(condition.expect_present);
        let Some(list) = map.get_mut(&condition.target) else {
            return false;
        };
        let Some(pos) = list
            .iter()
            .position(|w| w.seq == seq && &w.key == key && &w.condition == condition)
        else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            map.remove(&condition.target);
        }
        self.ref_count = self.ref_count.saturating_sub(1);
        true
    }

    /// Remove and return every waiter released by a transition of `target`.
    fn take(&mut self, target: &ResourceKey, presence: Presence) -> Vec<Waiter> {
        let taken = self
            .waiters_mut(presence.is_present())
            .remove(target)
            .unwrap_or_default();
        self.ref_count = self.ref_count.saturating_sub(taken.len());
        taken
    }
}

/// Result of registering an event's conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// Every condition already held; nothing was registered.
    AllPreResolved,
    /// At least one condition is registered and pending.
    Registered {
        /// Conditions that already held and were not registered.
        pre_resolved: Vec<DependencyCondition>,
    },
    /// The event carried no conditions.
    NoDependencies,
    /// A store subscription could not be established. Anything registered
    /// for the event has been rolled back.
    SubscribeFailed,
}

/// A condition of one event observed to hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Satisfied {
    /// The event's key.
    pub key: ResourceKey,
    /// The event's sequence.
    pub seq: u64,
    /// The condition that now holds.
    pub condition: DependencyCondition,
}

/// Debug view of one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    /// Store partition watched.
    pub view: View,
    /// Pattern watched.
    pub pattern: ResourceKey,
    /// Store-side identifier.
    pub id: SubscriptionId,
    /// Registered waiters.
    pub ref_count: usize,
    /// Waiters blocked on an appear.
    pub appear_waiters: usize,
    /// Waiters blocked on a disappear.
    pub disappear_waiters: usize,
}

/// Registry of shared wildcard subscriptions for one engine.
pub struct WildcardRegistry {
    /// Store that owns the subscriptions.
    store: Arc<dyn DataStore>,
    /// Channel handed to every listener.
    tx: UnboundedSender<WildcardNotification>,
    /// Live subscriptions.
    subscriptions: Mutex<HashMap<SubscriptionKey, WildcardSubscription>>,
    /// Per-`(view, pattern)` serialization.
    pattern_locks: StripedLocks,
}

impl core::fmt::Debug for WildcardRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WildcardRegistry")
            .field("subscriptions", &self.len())
            .field("pattern_locks", &self.pattern_locks.len())
            .finish_non_exhaustive()
    }
}

impl WildcardRegistry {
    /// Create an empty registry whose listeners report into `tx`.
    pub fn new(
        store: Arc<dyn DataStore>,
        tx: UnboundedSender<WildcardNotification>,
        lock_stripes: usize,
    ) -> Self {
        Self {
            store,
            tx,
            subscriptions: Mutex::new(HashMap::new()),
            pattern_locks: StripedLocks::new(lock_stripes),
        }
    }

    fn map(&self) -> MutexGuard<'_, HashMap<SubscriptionKey, WildcardSubscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register event `(key, seq)` as waiting on each of `conditions`,
    /// creating or reusing subscriptions.
    pub fn register_or_reuse(
        &self,
        key: &ResourceKey,
        seq: u64,
        conditions: &[DependencyCondition],
    ) -> Registration {
        if conditions.is_empty() {
            error!(key = %key, seq, "listener-based event registered without dependencies");
            return Registration::NoDependencies;
        }

        let mut pre_resolved = Vec::new();
        let mut registered: Vec<DependencyCondition> = Vec::new();
        for condition in conditions {
            let sub_key = SubscriptionKey::of(condition);
            let waiter = Waiter {
                key: key.clone(),
                seq,
                condition: condition.clone(),
            };
            let stripe = self.pattern_locks.lock(&sub_key);

            let exists = self.map().contains_key(&sub_key);
            if exists {
                // The subscription may have reported the target before this
                // waiter existed, or other waiters on it expect the opposite
                // presence; one read closes both gaps.
                if self.holds(condition) {
                    pre_resolved.push(condition.clone());
                    continue;
                }
                if let Some(sub) = self.map().get_mut(&sub_key) {
                    sub.add(waiter);
                }
                registered.push(condition.clone());
                continue;
            }

            let id = SubscriptionId::new();
            let mut sub = WildcardSubscription::new(id);
            sub.add(waiter);
            let _ = self.map().insert(sub_key.clone(), sub);

            let listener = WildcardListener::new(
                id,
                condition.view,
                condition.pattern.clone(),
                self.tx.clone(),
            );
            if let Err(e) = self
                .store
                .subscribe(&condition.pattern, condition.view, listener)
            {
                warn!(
                    key = %key,
                    seq,
                    pattern = %condition.pattern,
                    view = %condition.view,
                    error = %e,
                    "subscribe failed, falling back to polling"
                );
                let _ = self.map().remove(&sub_key);
                self.store.unsubscribe(id);
                drop(stripe);
                self.unregister(key, seq, &registered);
                return Registration::SubscribeFailed;
            }
            debug!(pattern = %condition.pattern, view = %condition.view, %id, "subscription created");

            // Absence is never replayed by a subscription.
            if !condition.expect_present && self.holds(condition) {
                self.remove_waiter_locked(&sub_key, key, seq, condition);
                pre_resolved.push(condition.clone());
                continue;
            }
            registered.push(condition.clone());
        }

        if registered.is_empty() {
            Registration::AllPreResolved
        } else {
            Registration::Registered { pre_resolved }
        }
    }

    /// Remove event `(key, seq)` from the subscriptions of `conditions`.
    ///
    /// Subscriptions left without waiters are removed and unsubscribed.
    /// Conditions with no matching waiter are logged and skipped.
    pub fn unregister(&self, key: &ResourceKey, seq: u64, conditions: &[DependencyCondition]) {
        for condition in conditions {
            let sub_key = SubscriptionKey::of(condition);
            let _stripe = self.pattern_locks.lock(&sub_key);
            self.remove_waiter_locked(&sub_key, key, seq, condition);
        }
    }

    /// Resolve the waiters released by one store notification.
    ///
    /// Notifications from subscriptions that no longer exist are ignored.
    pub fn apply_notification(&self, notification: &WildcardNotification) -> Vec<Satisfied> {
        let sub_key = SubscriptionKey {
            view: notification.view,
            pattern: notification.pattern.clone(),
        };
        let _stripe = self.pattern_locks.lock(&sub_key);
        let (taken, drained) = {
            let mut map = self.map();
            let Some(sub) = map.get_mut(&sub_key) else {
                debug!(subscription = %notification.subscription, "notification for removed subscription");
                return Vec::new();
            };
            if sub.id != notification.subscription {
                debug!(subscription = %notification.subscription, "stale subscription notification");
                return Vec::new();
            }
            let taken = sub.take(&notification.key, notification.presence);
            let drained = if sub.ref_count == 0 {
                map.remove(&sub_key).map(|s| s.id)
            } else {
                None
            };
            (taken, drained)
        };
        if let Some(id) = drained {
            self.store.unsubscribe(id);
            debug!(pattern = %sub_key.pattern, view = %sub_key.view, %id, "subscription removed");
        }
        taken
            .into_iter()
            .map(|w| Satisfied {
                key: w.key,
                seq: w.seq,
                condition: w.condition,
            })
            .collect()
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    /// Whether no subscription is live.
    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    /// Reference count of the subscription for `(view, pattern)`.
    pub fn ref_count(&self, view: View, pattern: &ResourceKey) -> Option<usize> {
        self.map()
            .get(&SubscriptionKey {
                view,
                pattern: pattern.clone(),
            })
            .map(|s| s.ref_count)
    }

    /// Every live subscription, sorted by view then pattern.
    pub fn infos(&self) -> Vec<SubscriptionInfo> {
        let map = self.map();
        let mut infos: Vec<SubscriptionInfo> = map
            .iter()
            .map(|(k, s)| SubscriptionInfo {
                view: k.view,
                pattern: k.pattern.clone(),
                id: s.id,
                ref_count: s.ref_count,
                appear_waiters: s.waiting_for_appear.values().map(Vec::len).sum(),
                disappear_waiters: s.waiting_for_disappear.values().map(Vec::len).sum(),
            })
            .collect();
        infos.sort_by(|a, b| a.view.cmp(&b.view).then_with(|| a.pattern.cmp(&b.pattern)));
        infos
    }

    /// Point read of a condition. Read failures count as not holding.
    fn holds(&self, condition: &DependencyCondition) -> bool {
        match self.store.read(&condition.target, condition.view) {
            Ok(record) => condition.is_satisfied_by(record.is_some()),
            Err(e) => {
                debug!(condition = %condition, error = %e, "point read failed");
                false
            }
        }
    }

    /// Remove one waiter; the caller holds the subscription's stripe.
    fn remove_waiter_locked(
        &self,
        sub_key: &SubscriptionKey,
        key: &ResourceKey,
        seq: u64,
        condition: &DependencyCondition,
    ) {
        let drained = {
            let mut map = self.map();
            let Some(sub) = map.get_mut(sub_key) else {
                warn!(key = %key, seq, pattern = %sub_key.pattern, "unregister from unknown subscription");
                return;
            };
            if !sub.remove(key, seq, condition) {
                warn!(key = %key, seq, condition = %condition, "unregister of unknown waiter");
                return;
            }
            if sub.ref_count == 0 {
                map.remove(sub_key).map(|s| s.id)
            } else {
                None
            }
        };
        if let Some(id) = drained {
            self.store.unsubscribe(id);
            debug!(pattern = %sub_key.pattern, view = %sub_key.view, %id, "subscription removed");
        }
    }
}
