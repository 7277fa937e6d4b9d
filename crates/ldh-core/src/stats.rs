//! Counters, tick reports and the debug dump.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use ldh_types::EventType;
use serde::Serialize;

use crate::registry::SubscriptionInfo;
use crate::waiting::{EventWait, LaneInfo};

/// Lifetime counters of one engine.
#[derive(Debug, Default)]
pub struct EngineStats {
    queued: AtomicU64,
    dequeued: AtomicU64,
    processed_now: AtomicU64,
    suppressed: AtomicU64,
    cancelled: AtomicU64,
    deferred: AtomicU64,
    resolved: AtomicU64,
    expired: AtomicU64,
    completed_on_expiry: AtomicU64,
    dispatched: AtomicU64,
    dispatch_panics: AtomicU64,
    malformed: AtomicU64,
    notifications: AtomicU64,
}

/// Which counter to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Events accepted into the intake queue.
    Queued,
    /// Events moved from the intake queue into lanes.
    Dequeued,
    /// Events dispatched without queueing.
    ProcessedNow,
    /// Events dropped by the intake guard.
    Suppressed,
    /// Pending ADDs withdrawn by a REMOVE.
    Cancelled,
    /// Consumer deferrals.
    Deferred,
    /// Events whose conditions all held.
    Resolved,
    /// Events dropped at their deadline.
    Expired,
    /// Ordering-only events completed at their deadline.
    CompletedOnExpiry,
    /// Consumer callbacks run.
    Dispatched,
    /// Consumer callbacks that panicked.
    DispatchPanics,
    /// Notifications with an empty key.
    Malformed,
    /// Store notifications applied.
    Notifications,
}

impl EngineStats {
    const fn cell(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::Queued => &self.queued,
            Counter::Dequeued => &self.dequeued,
            Counter::ProcessedNow => &self.processed_now,
            Counter::Suppressed => &self.suppressed,
            Counter::Cancelled => &self.cancelled,
            Counter::Deferred => &self.deferred,
            Counter::Resolved => &self.resolved,
            Counter::Expired => &self.expired,
            Counter::CompletedOnExpiry => &self.completed_on_expiry,
            Counter::Dispatched => &self.dispatched,
            Counter::DispatchPanics => &self.dispatch_panics,
            Counter::Malformed => &self.malformed,
            Counter::Notifications => &self.notifications,
        }
    }

    /// Add one to `counter`.
    pub fn bump(&self, counter: Counter) {
        self.add(counter, 1);
    }

    /// Add `n` to `counter`.
    pub fn add(&self, counter: Counter, n: u64) {
        if n > 0 {
            let _ = self.cell(counter).fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Current value of `counter`.
    pub fn get(&self, counter: Counter) -> u64 {
        self.cell(counter).load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            queued: self.get(Counter::Queued),
            dequeued: self.get(Counter::Dequeued),
            processed_now: self.get(Counter::ProcessedNow),
            suppressed: self.get(Counter::Suppressed),
            cancelled: self.get(Counter::Cancelled),
            deferred: self.get(Counter::Deferred),
            resolved: self.get(Counter::Resolved),
            expired: self.get(Counter::Expired),
            completed_on_expiry: self.get(Counter::CompletedOnExpiry),
            dispatched: self.get(Counter::Dispatched),
            dispatch_panics: self.get(Counter::DispatchPanics),
            malformed: self.get(Counter::Malformed),
            notifications: self.get(Counter::Notifications),
        }
    }
}

/// Copy of an engine's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    /// Events accepted into the intake queue.
    pub queued: u64,
    /// Events moved from the intake queue into lanes.
    pub dequeued: u64,
    /// Events dispatched without queueing.
    pub processed_now: u64,
    /// Events dropped by the intake guard.
    pub suppressed: u64,
    /// Pending ADDs withdrawn by a REMOVE.
    pub cancelled: u64,
    /// Consumer deferrals.
    pub deferred: u64,
    /// Events whose conditions all held.
    pub resolved: u64,
    /// Events dropped at their deadline.
    pub expired: u64,
    /// Ordering-only events completed at their deadline.
    pub completed_on_expiry: u64,
    /// Consumer callbacks run.
    pub dispatched: u64,
    /// Consumer callbacks that panicked.
    pub dispatch_panics: u64,
    /// Notifications with an empty key.
    pub malformed: u64,
    /// Store notifications applied.
    pub notifications: u64,
}

/// What one poller tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Store notifications applied.
    pub notifications: usize,
    /// Events drained from the intake queue.
    pub dequeued: usize,
    /// Listener-based events registered with the registry.
    pub registered: usize,
    /// Timer-based events polled.
    pub checked: usize,
    /// Events that became resolved.
    pub resolved: usize,
    /// Events dropped at their deadline.
    pub expired: usize,
    /// Ordering-only events completed at their deadline.
    pub completed_on_expiry: usize,
    /// Events moved into the settle buffer.
    pub released: usize,
    /// Events handed to the dispatcher.
    pub dispatched: usize,
}

impl TickReport {
    /// Whether the tick changed nothing.
    pub const fn is_idle(&self) -> bool {
        self.notifications == 0
            && self.dequeued == 0
            && self.registered == 0
            && self.checked == 0
            && self.resolved == 0
            && self.expired == 0
            && self.completed_on_expiry == 0
            && self.released == 0
            && self.dispatched == 0
    }
}

/// Debug dump of one engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineDump {
    /// Consumer the engine serves.
    pub consumer: String,
    /// Events in the intake queue.
    pub intake_depth: usize,
    /// Per-key lanes.
    pub lanes: Vec<LaneInfo>,
    /// Events dwelling in the settle buffer.
    pub settle_depth: usize,
    /// Consumer callbacks currently running or waiting for a worker.
    pub dispatching: usize,
    /// Live wildcard subscriptions.
    pub subscriptions: Vec<SubscriptionInfo>,
    /// Every waiting event.
    pub events: Vec<EventWait>,
    /// Lifetime counters.
    pub counters: CounterSnapshot,
}

impl core::fmt::Display for EngineDump {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(
            f,
            "consumer {}: intake={} settle={} dispatching={}",
            self.consumer, self.intake_depth, self.settle_depth, self.dispatching
        )?;
        for lane in &self.lanes {
            let in_flight = lane.in_flight.map_or("-", EventType::as_str);
            writeln!(
                f,
                "  key {} depth={} in_flight={in_flight} oldest_wait_ms={}",
                lane.key, lane.depth, lane.oldest_wait_ms
            )?;
        }
        for sub in &self.subscriptions {
            writeln!(
                f,
                "  subscription {}:{} refs={} appear={} disappear={}",
                sub.view, sub.pattern, sub.ref_count, sub.appear_waiters, sub.disappear_waiters
            )?;
        }
        for event in &self.events {
            let mut line = String::new();
            let _ = write!(
                line,
                "  event {}#{} {} waited_ms={} pending={}",
                event.key, event.seq, event.event_type, event.waited_ms, event.pending_conditions
            );
            if event.timer_based {
                line.push_str(" timer");
            }
            if event.ordering_only {
                line.push_str(" ordering");
            }
            if event.resolved {
                line.push_str(" resolved");
            }
            writeln!(f, "{line} expires_in_ms={}", event.expires_in_ms)?;
        }
        let c = &self.counters;
        write!(
            f,
            "  counters queued={} dequeued={} processed_now={} suppressed={} cancelled={} \
             deferred={} resolved={} expired={} completed_on_expiry={} dispatched={} \
             dispatch_panics={} malformed={} notifications={}",
            c.queued,
            c.dequeued,
            c.processed_now,
            c.suppressed,
            c.cancelled,
            c.deferred,
            c.resolved,
            c.expired,
            c.completed_on_expiry,
            c.dispatched,
            c.dispatch_panics,
            c.malformed,
            c.notifications
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ldh_types::ResourceKey;

    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = EngineStats::default();
        stats.bump(Counter::Queued);
        stats.add(Counter::Queued, 2);
        stats.add(Counter::Expired, 0);
        let snap = stats.snapshot();
        assert_eq!(snap.queued, 3);
        assert_eq!(snap.expired, 0);
    }

    #[test]
    fn idle_report() {
        assert!(TickReport::default().is_idle());
        let report = TickReport {
            released: 1,
            ..TickReport::default()
        };
        assert!(!report.is_idle());
    }

    #[test]
    fn dump_renders_text_and_json() {
        let dump = EngineDump {
            consumer: "routes".to_owned(),
            intake_depth: 0,
            lanes: vec![LaneInfo {
                key: ResourceKey::new("/routes/r1"),
                depth: 2,
                in_flight: Some(EventType::Add),
                oldest_wait_ms: 1_500,
            }],
            settle_depth: 1,
            dispatching: 0,
            subscriptions: Vec::new(),
            events: vec![EventWait {
                key: ResourceKey::new("/routes/r1"),
                seq: 7,
                event_type: EventType::Update,
                waited_ms: 40,
                pending_conditions: 0,
                timer_based: true,
                ordering_only: true,
                resolved: false,
                expires_in_ms: 960,
            }],
            counters: CounterSnapshot::default(),
        };
        let text = dump.to_string();
        assert!(text.starts_with("consumer routes:"));
        assert!(text.contains("key /routes/r1 depth=2 in_flight=add oldest_wait_ms=1500"));
        assert!(text.contains(
            "event /routes/r1#7 update waited_ms=40 pending=0 timer ordering expires_in_ms=960"
        ));

        let json = serde_json::to_value(&dump).unwrap();
        assert_eq!(json.get("settle_depth").and_then(|v| v.as_u64()), Some(1));
        assert_eq!(
            json.pointer("/lanes/0/in_flight").and_then(|v| v.as_str()),
            Some("add")
        );
    }
}
