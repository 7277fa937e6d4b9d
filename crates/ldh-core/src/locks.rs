//! Value-addressed striped lock table.
//!
//! Serializes work on one key (or one subscription pattern) without a
//! global lock: the value's hash picks one of a fixed set of mutexes.
//! Unrelated values proceed concurrently unless they collide on a stripe.
//!
//! Guards are plain [`std::sync::MutexGuard`]s and must not be held across
//! an `.await`. Never acquire two guards from the same table at once.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A fixed-size table of mutexes addressed by value hash.
#[derive(Debug)]
pub struct StripedLocks {
    /// One mutex per stripe; never empty.
    stripes: Vec<Mutex<()>>,
}

impl StripedLocks {
    /// Create a table with `stripes` mutexes (at least one).
    pub fn new(stripes: usize) -> Self {
        let count = stripes.max(1);
        let mut table = Vec::with_capacity(count);
        table.resize_with(count, || Mutex::new(()));
        Self { stripes: table }
    }

    /// Number of stripes.
    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    /// Always `false`; a table has at least one stripe.
    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }

    /// Index of the stripe guarding `value`.
    pub fn stripe_of<K: Hash + ?Sized>(&self, value: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        let len = u64::try_from(self.stripes.len()).unwrap_or(u64::MAX);
        let idx = hasher.finish().checked_rem(len).unwrap_or(0);
        usize::try_from(idx).unwrap_or(0)
    }

    /// Lock the stripe guarding `value`.
    ///
    /// A poisoned stripe is recovered: it protects no data of its own.
    #[allow(clippy::indexing_slicing)]
    pub fn lock<K: Hash + ?Sized>(&self, value: &K) -> MutexGuard<'_, ()> {
        // Safe: stripe_of returns a value below len, and len >= 1.
        self.stripes[self.stripe_of(value)]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    #[test]
    fn zero_stripes_becomes_one() {
        let locks = StripedLocks::new(0);
        assert_eq!(locks.len(), 1);
        assert!(!locks.is_empty());
        let _guard = locks.lock("anything");
    }

    #[test]
    fn same_value_same_stripe() {
        let locks = StripedLocks::new(16);
        let a = locks.stripe_of("/vpn/blue");
        let b = locks.stripe_of(&String::from("/vpn/blue"));
        assert_eq!(a, b);
        assert!(a < 16);
    }

    #[test]
    fn serializes_contending_threads() {
        let locks = Arc::new(StripedLocks::new(4));
        let counter = Arc::new(AtomicU64::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let _guard = locks.lock("shared");
                        // Non-atomic read-modify-write made safe by the stripe.
                        let seen = counter.load(Ordering::Relaxed);
                        counter.store(seen.saturating_add(1), Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().is_ok());
        }
        assert_eq!(counter.load(Ordering::Relaxed), 800);
    }
}
