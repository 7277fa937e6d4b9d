//! Consumer callback trait.
//!
//! A consumer is the domain handler an engine delivers events to. It
//! decides what an ADD, UPDATE or REMOVE means, typically by reading other
//! resources and programming state. When a resource it needs is not there
//! yet, it answers [`Disposition::Defer`] instead of acting, and the engine
//! redelivers the same event once the listed conditions hold.
//!
//! Callbacks run on the blocking pool, never on the poller. Events of one
//! key are delivered one at a time in arrival order; events of different
//! keys may be delivered concurrently.

use ldh_types::ResourceKey;

use crate::event::DeferRequest;

/// What a consumer did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The event is handled.
    Done,
    /// Redeliver the event once the request's conditions hold.
    Defer(DeferRequest),
}

/// Domain handler receiving an engine's events.
pub trait Consumer: Send + Sync + 'static {
    /// Opaque before/after payload carried by events.
    type Snapshot: Clone + Send + Sync + core::fmt::Debug + 'static;

    /// Unique name; keys the scheduler's dump.
    fn name(&self) -> &str;

    /// A resource was created.
    fn on_add(&self, key: &ResourceKey, new: &Self::Snapshot) -> Disposition;

    /// A resource changed.
    fn on_update(&self, key: &ResourceKey, old: &Self::Snapshot, new: &Self::Snapshot)
    -> Disposition;

    /// A resource was deleted.
    fn on_remove(&self, key: &ResourceKey, old: &Self::Snapshot) -> Disposition;

    /// Pattern under which waits on `target` share a subscription.
    ///
    /// Conditions deferred without an explicit pattern get this one. The
    /// default shares nothing.
    fn wildcard_path_of(&self, target: &ResourceKey) -> Option<ResourceKey> {
        let _ = target;
        None
    }
}
