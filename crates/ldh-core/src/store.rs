//! The backing-store collaborator.
//!
//! The scheduler needs two things from the shared data store: point reads
//! ("does this key exist in this view right now?") and wildcard
//! subscriptions that report keys appearing or disappearing under a
//! pattern. [`DataStore`] abstracts both. Production deployments adapt
//! their change-feed client to it; [`InMemoryStore`] implements it for
//! tests and the demo binary.
//!
//! Subscriptions report through a [`WildcardListener`], which only pushes
//! a [`WildcardNotification`] onto the owning engine's channel. Stores may
//! call it from any thread, including from inside [`DataStore::subscribe`],
//! without touching scheduler locks.
//!
//! [`InMemoryStore`]: crate::memory_store::InMemoryStore

use ldh_types::{Presence, ResourceKey, SubscriptionId, View};
use tokio::sync::mpsc::UnboundedSender;

/// A stored record. The scheduler only checks whether one exists.
pub type Record = serde_json::Value;

/// Errors reported by a [`DataStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not serve the request right now.
    #[error("store unavailable: {reason}")]
    Unavailable {
        /// Description of the failure.
        reason: String,
    },

    /// A wildcard subscription could not be established.
    #[error("subscribe to {view}:{pattern} failed: {reason}")]
    Subscribe {
        /// The pattern that was being subscribed.
        pattern: ResourceKey,
        /// The view that was being subscribed.
        view: View,
        /// Description of the failure.
        reason: String,
    },
}

/// Read and subscription access to the shared data store.
pub trait DataStore: Send + Sync + 'static {
    /// Read `key` under `view`. `Ok(None)` means the key does not exist.
    ///
    /// Implementations must return within a bounded time; the poller
    /// calls this on its tick.
    fn read(&self, key: &ResourceKey, view: View) -> Result<Option<Record>, StoreError>;

    /// Start reporting appear/disappear transitions of keys matching
    /// `pattern` under `view` to `listener`.
    ///
    /// Implementations must report an appear for every matching key
    /// already present when the subscription takes effect.
    fn subscribe(
        &self,
        pattern: &ResourceKey,
        view: View,
        listener: WildcardListener,
    ) -> Result<(), StoreError>;

    /// Stop the subscription identified by `subscription`. Unknown
    /// identifiers are ignored.
    fn unsubscribe(&self, subscription: SubscriptionId);
}

/// One transition reported by a wildcard subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardNotification {
    /// Subscription that observed the transition.
    pub subscription: SubscriptionId,
    /// View the subscription watches.
    pub view: View,
    /// Pattern the subscription watches.
    pub pattern: ResourceKey,
    /// The member key that changed.
    pub key: ResourceKey,
    /// Whether the key appeared or disappeared.
    pub presence: Presence,
}

/// Handle a store uses to report transitions for one subscription.
#[derive(Debug, Clone)]
pub struct WildcardListener {
    /// Subscription this listener reports for.
    subscription: SubscriptionId,
    /// View the subscription watches.
    view: View,
    /// Pattern the subscription watches.
    pattern: ResourceKey,
    /// Channel into the owning engine.
    tx: UnboundedSender<WildcardNotification>,
}

impl WildcardListener {
    /// Create a listener for one subscription.
    pub const fn new(
        subscription: SubscriptionId,
        view: View,
        pattern: ResourceKey,
        tx: UnboundedSender<WildcardNotification>,
    ) -> Self {
        Self {
            subscription,
            view,
            pattern,
            tx,
        }
    }

    /// Identifier to pass to [`DataStore::unsubscribe`].
    pub const fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    /// The subscribed pattern.
    pub const fn pattern(&self) -> &ResourceKey {
        &self.pattern
    }

    /// The subscribed view.
    pub const fn view(&self) -> View {
        self.view
    }

    /// Report that `key` now exists.
    pub fn appeared(&self, key: &ResourceKey) {
        self.send(key, Presence::Appeared);
    }

    /// Report that `key` no longer exists.
    pub fn disappeared(&self, key: &ResourceKey) {
        self.send(key, Presence::Disappeared);
    }

    fn send(&self, key: &ResourceKey, presence: Presence) {
        let notification = WildcardNotification {
            subscription: self.subscription,
            view: self.view,
            pattern: self.pattern.clone(),
            key: key.clone(),
            presence,
        };
        // A closed channel means the engine is gone; nothing left to wake.
        if self.tx.send(notification).is_err() {
            tracing::debug!(
                subscription = %self.subscription,
                key = %key,
                "dropping notification for a closed engine"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    #[test]
    fn listener_tags_notifications_with_subscription() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = SubscriptionId::new();
        let listener = WildcardListener::new(id, View::Observed, ResourceKey::new("/vpn/*"), tx);

        listener.appeared(&ResourceKey::new("/vpn/blue"));
        listener.disappeared(&ResourceKey::new("/vpn/red"));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.subscription, id);
        assert_eq!(first.pattern, ResourceKey::new("/vpn/*"));
        assert_eq!(first.view, View::Observed);
        assert_eq!(first.presence, Presence::Appeared);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.key, ResourceKey::new("/vpn/red"));
        assert_eq!(second.presence, Presence::Disappeared);
    }

    #[test]
    fn send_after_receiver_drop_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let listener =
            WildcardListener::new(SubscriptionId::new(), View::Desired, ResourceKey::new("/a"), tx);
        listener.appeared(&ResourceKey::new("/a"));
    }
}
