//! Settle buffer.
//!
//! Resolved events wait here for a fixed dwell before dispatch, so that a
//! consumer reading the store on dispatch sees the state that resolved its
//! dependencies. Without the dwell an eventually consistent store can make
//! the consumer re-defer an event that was just released.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::event::DispatchItem;

/// A resolved event and the moment it resolved.
#[derive(Debug, Clone)]
pub struct DelayedResolvedEvent<S> {
    /// The event to dispatch.
    pub item: DispatchItem<S>,
    /// When its last condition was observed to hold.
    pub resolved_at_ms: u64,
}

impl<S> DelayedResolvedEvent<S> {
    /// Whether the dwell has elapsed at `now_ms`.
    pub const fn is_settled(&self, now_ms: u64, delay_ms: u64) -> bool {
        now_ms.saturating_sub(self.resolved_at_ms) >= delay_ms
    }
}

/// FIFO of resolved events awaiting their dwell.
#[derive(Debug)]
pub struct SettleBuffer<S> {
    /// Minimum dwell in milliseconds.
    delay_ms: u64,
    /// Entries in release order.
    entries: Mutex<VecDeque<DelayedResolvedEvent<S>>>,
}

impl<S> SettleBuffer<S> {
    /// Create a buffer with the given dwell.
    pub const fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DelayedResolvedEvent<S>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a resolved event.
    pub fn push(&self, item: DispatchItem<S>, resolved_at_ms: u64) {
        self.lock().push_back(DelayedResolvedEvent {
            item,
            resolved_at_ms,
        });
    }

    /// Remove and return every entry whose dwell has elapsed, oldest first.
    ///
    /// Entries resolved at different times may sit out of resolution order,
    /// so the whole buffer is scanned rather than only its head.
    pub fn drain_settled(&self, now_ms: u64) -> Vec<DispatchItem<S>> {
        let mut entries = self.lock();
        let mut ready = Vec::new();
        let mut waiting = VecDeque::with_capacity(entries.len());
        for entry in entries.drain(..) {
            if entry.is_settled(now_ms, self.delay_ms) {
                ready.push(entry.item);
            } else {
                waiting.push_back(entry);
            }
        }
        *entries = waiting;
        ready
    }

    /// Number of entries still dwelling.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is dwelling.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use ldh_types::{Change, ResourceKey};

    use super::*;

    fn item(seq: u64, key: &str) -> DispatchItem<()> {
        DispatchItem {
            seq,
            key: ResourceKey::new(key),
            change: Change::Add { new: () },
        }
    }

    #[test]
    fn dwell_boundary_is_inclusive() {
        let buffer = SettleBuffer::new(2_000);
        buffer.push(item(1, "/a"), 1_000);
        assert!(buffer.drain_settled(2_999).is_empty());
        let ready = buffer.drain_settled(3_000);
        assert_eq!(ready.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn scans_past_an_unsettled_head() {
        let buffer = SettleBuffer::new(100);
        buffer.push(item(1, "/late"), 500);
        buffer.push(item(2, "/early"), 0);
        let ready = buffer.drain_settled(150);
        assert_eq!(ready.iter().map(|i| i.seq).collect::<Vec<_>>(), vec![2]);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn zero_delay_releases_immediately() {
        let buffer = SettleBuffer::new(0);
        buffer.push(item(1, "/a"), 10);
        assert_eq!(buffer.drain_settled(10).len(), 1);
    }
}
