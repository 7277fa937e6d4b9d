//! Millisecond clocks for the scheduler.
//!
//! Every deadline in the engine (`expires_at`, `last_checked_at`, settle
//! dwell) is an absolute millisecond reading taken from a [`Clock`]. The
//! production clock reads UTC wall time; tests drive a [`ManualClock`] so
//! ticks are deterministic.
//!
//! All arithmetic on readings saturates. A clock that would run past
//! `u64::MAX` milliseconds pins there instead of wrapping.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Source of the current time in milliseconds.
pub trait Clock: Send + Sync + core::fmt::Debug {
    /// Current reading in milliseconds.
    fn now_ms(&self) -> u64;
}

/// Wall clock backed by [`Utc::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        // Pre-epoch readings only happen on badly misconfigured hosts; treat as 0.
        u64::try_from(Utc::now().timestamp_millis().max(0)).unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    /// Current reading in milliseconds.
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `start_ms`.
    pub const fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    /// Move the clock forward by `ms`. Returns the new reading.
    pub fn advance(&self, ms: u64) -> u64 {
        let previous = self
            .now
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |now| {
                Some(now.saturating_add(ms))
            })
            .unwrap_or_else(|current| current);
        previous.saturating_add(ms)
    }

    /// Set the reading to `ms`.
    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        assert_eq!(clock.advance(250), 1_250);
        assert_eq!(clock.now_ms(), 1_250);
        clock.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn manual_clock_saturates() {
        let clock = ManualClock::new(u64::MAX - 1);
        assert_eq!(clock.advance(5), u64::MAX);
        assert_eq!(clock.now_ms(), u64::MAX);
    }

    #[test]
    fn system_clock_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
