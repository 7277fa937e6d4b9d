//! Per-key waiting store.
//!
//! Holds every event the engine has accepted but not yet handed to the
//! settle buffer:
//!
//! - the **intake queue**, where newly accepted events sit until the next
//!   poller tick drains them, and
//! - one **lane** per key: the key's deferred events ordered by arrival
//!   sequence, plus a marker for the one event of that key currently in
//!   the settle buffer or the dispatcher.
//!
//! A lane releases its head only when the head is resolved and nothing
//! is in flight for the key. That single rule gives both ordering
//! guarantees: per-key dispatch order equals arrival order, and no two
//! events for the same key are ever dispatched concurrently.
//!
//! All state sits behind one mutex held only for in-memory bookkeeping.
//! Store reads and registry calls happen outside it: callers take a
//! snapshot of what to check, do the I/O, then apply the result by
//! `(key, seq)`, tolerating events that vanished in between.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ldh_types::{DependencyCondition, EventType, ResourceKey};
use serde::Serialize;

use crate::event::DeferredEvent;
use crate::intake::PendingEntry;

/// The event of a key currently settling or being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlight {
    /// Its arrival sequence.
    pub seq: u64,
    /// Its event type.
    pub event_type: EventType,
}

/// Deferred events for one key.
#[derive(Debug)]
struct KeyLane<S> {
    /// Events in arrival-sequence order.
    queue: VecDeque<DeferredEvent<S>>,
    /// The key's event that has left the lane but not finished dispatch.
    in_flight: Option<InFlight>,
}

impl<S> Default for KeyLane<S> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            in_flight: None,
        }
    }
}

impl<S> KeyLane<S> {
    fn insert(&mut self, event: DeferredEvent<S>) {
        let pos = self
            .queue
            .iter()
            .position(|e| e.seq > event.seq)
            .unwrap_or(self.queue.len());
        self.queue.insert(pos, event);
    }

    fn find_mut(&mut self, seq: u64) -> Option<&mut DeferredEvent<S>> {
        self.queue.iter_mut().find(|e| e.seq == seq)
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_none()
    }
}

/// Everything behind the store's mutex.
#[derive(Debug)]
struct WaitingState<S> {
    /// Accepted events not yet drained into lanes.
    intake: VecDeque<DeferredEvent<S>>,
    /// Lanes by key. Idle lanes are removed.
    lanes: HashMap<ResourceKey, KeyLane<S>>,
}

impl<S> WaitingState<S> {
    fn event_mut(&mut self, key: &ResourceKey, seq: u64) -> Option<&mut DeferredEvent<S>> {
        self.lanes.get_mut(key)?.find_mut(seq)
    }

    fn prune(&mut self, key: &ResourceKey) {
        if self.lanes.get(key).is_some_and(KeyLane::is_idle) {
            self.lanes.remove(key);
        }
    }
}

/// A listener-based event awaiting registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    /// The event's key.
    pub key: ResourceKey,
    /// The event's sequence.
    pub seq: u64,
    /// Its pending conditions.
    pub conditions: Vec<DependencyCondition>,
}

/// A timer-based event due for a re-check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerCheck {
    /// The event's key.
    pub key: ResourceKey,
    /// The event's sequence.
    pub seq: u64,
    /// Its pending conditions.
    pub conditions: Vec<DependencyCondition>,
}

/// Effect of applying an update to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventUpdate {
    /// The event is no longer in the store.
    Missing,
    /// The event still has pending conditions.
    Pending,
    /// The event became resolved.
    Resolved,
    /// The event was resolved before this update.
    AlreadyResolved,
}

impl EventUpdate {
    fn of<S>(was_resolved: bool, event: &DeferredEvent<S>) -> Self {
        match (was_resolved, event.is_resolved()) {
            (true, _) => Self::AlreadyResolved,
            (false, true) => Self::Resolved,
            (false, false) => Self::Pending,
        }
    }
}

/// What expiry did to one event.
#[derive(Debug)]
pub enum Expiry<S> {
    /// An ordering-only event ran out of time and completes as resolved.
    Completed {
        /// The event's key.
        key: ResourceKey,
        /// The event's sequence.
        seq: u64,
    },
    /// The event was removed and will not be dispatched.
    Dropped(DeferredEvent<S>),
}

/// Depth and age of one key's lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaneInfo {
    /// The key.
    pub key: ResourceKey,
    /// Events waiting in the lane.
    pub depth: usize,
    /// Type of the key's event in the settle buffer or dispatcher.
    pub in_flight: Option<EventType>,
    /// Wait time of the lane's oldest event.
    pub oldest_wait_ms: u64,
}

/// Wait state of one deferred event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventWait {
    /// The event's key.
    pub key: ResourceKey,
    /// The event's sequence.
    pub seq: u64,
    /// The event's type.
    pub event_type: EventType,
    /// Milliseconds since the event entered the scheduler.
    pub waited_ms: u64,
    /// Conditions still pending.
    pub pending_conditions: usize,
    /// Whether the event is polled.
    pub timer_based: bool,
    /// Whether the event only holds its key's order behind an earlier one.
    pub ordering_only: bool,
    /// Whether the event is resolved and only waiting for its turn.
    pub resolved: bool,
    /// Milliseconds until the event expires (0 once past the deadline).
    pub expires_in_ms: u64,
}

/// Thread-safe per-key waiting store.
#[derive(Debug)]
pub struct WaitingStore<S> {
    /// Intake queue and lanes.
    state: Mutex<WaitingState<S>>,
}

impl<S> Default for WaitingStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> WaitingStore<S> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WaitingState {
                intake: VecDeque::new(),
                lanes: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WaitingState<S>> {
        // Every mutation below leaves the maps consistent at each step.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Intake
    // -----------------------------------------------------------------------

    /// Append a newly accepted event to the intake queue.
    pub fn enqueue(&self, event: DeferredEvent<S>) {
        self.lock().intake.push_back(event);
    }

    /// Move every queued event into its key's lane. Returns how many moved.
    pub fn drain_intake(&self) -> usize {
        let mut state = self.lock();
        let drained: Vec<DeferredEvent<S>> = state.intake.drain(..).collect();
        let count = drained.len();
        for event in drained {
            state.lanes.entry(event.key.clone()).or_default().insert(event);
        }
        count
    }

    /// The newest outstanding event for `key`: the last one in the intake
    /// queue, else the lane's tail, else the in-flight one.
    pub fn pending_tail(&self, key: &ResourceKey) -> Option<PendingEntry> {
        let state = self.lock();
        if let Some(event) = state.intake.iter().rev().find(|e| &e.key == key) {
            return Some(PendingEntry {
                seq: event.seq,
                event_type: event.event_type(),
                cancellable: true,
            });
        }
        let lane = state.lanes.get(key)?;
        if let Some(event) = lane.queue.back() {
            return Some(PendingEntry {
                seq: event.seq,
                event_type: event.event_type(),
                cancellable: true,
            });
        }
        lane.in_flight.map(|f| PendingEntry {
            seq: f.seq,
            event_type: f.event_type,
            cancellable: false,
        })
    }

    /// Withdraw the event `(key, seq)` if it has not been released yet.
    ///
    /// Returns `None` if it is already gone; withdrawing twice is harmless.
    pub fn cancel(&self, key: &ResourceKey, seq: u64) -> Option<DeferredEvent<S>> {
        let mut state = self.lock();
        if let Some(pos) = state
            .intake
            .iter()
            .position(|e| e.seq == seq && &e.key == key)
        {
            return state.intake.remove(pos);
        }
        let lane = state.lanes.get_mut(key)?;
        let pos = lane.queue.iter().position(|e| e.seq == seq)?;
        let removed = lane.queue.remove(pos);
        state.prune(key);
        removed
    }

    /// Claim `key` for an immediate dispatch of event `seq`.
    ///
    /// Succeeds only if nothing is outstanding for the key.
    pub fn begin_immediate(&self, key: &ResourceKey, seq: u64, event_type: EventType) -> bool {
        let mut state = self.lock();
        if state.intake.iter().any(|e| &e.key == key) {
            return false;
        }
        let lane = state.lanes.entry(key.clone()).or_default();
        if !lane.is_idle() {
            return false;
        }
        lane.in_flight = Some(InFlight { seq, event_type });
        true
    }

    /// Dispatch of `(key, seq)` is over.
    ///
    /// Clears the in-flight marker; if the consumer deferred the event, the
    /// deferral takes its place in the lane in the same step, so no later
    /// event of the key can overtake it.
    pub fn finish(&self, key: &ResourceKey, seq: u64, deferral: Option<DeferredEvent<S>>) {
        let mut state = self.lock();
        let lane = state.lanes.entry(key.clone()).or_default();
        match lane.in_flight {
            Some(f) if f.seq == seq => lane.in_flight = None,
            other => tracing::warn!(
                key = %key,
                seq,
                in_flight = ?other.map(|f| f.seq),
                "finished event was not the key's in-flight event"
            ),
        }
        if let Some(event) = deferral {
            lane.insert(event);
        }
        state.prune(key);
    }

    // -----------------------------------------------------------------------
    // Listener registration
    // -----------------------------------------------------------------------

    /// Listener-based events that have not been registered yet.
    pub fn registration_requests(&self) -> Vec<RegistrationRequest> {
        let state = self.lock();
        state
            .lanes
            .values()
            .flat_map(|lane| lane.queue.iter())
            .filter(|e| e.needs_registration())
            .map(|e| RegistrationRequest {
                key: e.key.clone(),
                seq: e.seq,
                conditions: e.pending.clone(),
            })
            .collect()
    }

    /// Record a completed registration; `pre_resolved` conditions are dropped.
    pub fn apply_registration(
        &self,
        key: &ResourceKey,
        seq: u64,
        pre_resolved: &[DependencyCondition],
        now_ms: u64,
    ) -> EventUpdate {
        let mut state = self.lock();
        let Some(event) = state.event_mut(key, seq) else {
            return EventUpdate::Missing;
        };
        let was_resolved = event.is_resolved();
        event.registered = true;
        event.pending.retain(|c| !pre_resolved.contains(c));
        if event.pending.is_empty() {
            event.resolve(now_ms);
        }
        EventUpdate::of(was_resolved, event)
    }

    /// Switch a listener-based event to polling.
    pub fn fall_back_to_timer(&self, key: &ResourceKey, seq: u64) -> EventUpdate {
        let mut state = self.lock();
        let Some(event) = state.event_mut(key, seq) else {
            return EventUpdate::Missing;
        };
        event.timer_based = true;
        event.last_checked_at_ms = None;
        EventUpdate::of(event.is_resolved(), event)
    }

    /// Resolve `(key, seq)` outright.
    pub fn mark_resolved(&self, key: &ResourceKey, seq: u64, now_ms: u64) -> EventUpdate {
        let mut state = self.lock();
        let Some(event) = state.event_mut(key, seq) else {
            return EventUpdate::Missing;
        };
        let was_resolved = event.is_resolved();
        event.resolve(now_ms);
        EventUpdate::of(was_resolved, event)
    }

    /// One condition of `(key, seq)` was observed to hold.
    pub fn satisfy(
        &self,
        key: &ResourceKey,
        seq: u64,
        condition: &DependencyCondition,
        now_ms: u64,
    ) -> EventUpdate {
        let mut state = self.lock();
        let Some(event) = state.event_mut(key, seq) else {
            return EventUpdate::Missing;
        };
        let was_resolved = event.is_resolved();
        let _ = event.satisfy(condition, now_ms);
        EventUpdate::of(was_resolved, event)
    }

    // -----------------------------------------------------------------------
    // Timer-based checks
    // -----------------------------------------------------------------------

    /// Timer-based events whose retry interval has elapsed.
    pub fn due_timer_checks(&self, now_ms: u64) -> Vec<TimerCheck> {
        let state = self.lock();
        state
            .lanes
            .values()
            .flat_map(|lane| lane.queue.iter())
            .filter(|e| e.is_check_due(now_ms))
            .map(|e| TimerCheck {
                key: e.key.clone(),
                seq: e.seq,
                conditions: e.pending.clone(),
            })
            .collect()
    }

    /// Record a poll of `(key, seq)`; only `still_pending` remain.
    pub fn apply_timer_check(
        &self,
        key: &ResourceKey,
        seq: u64,
        still_pending: &[DependencyCondition],
        now_ms: u64,
    ) -> EventUpdate {
        let mut state = self.lock();
        let Some(event) = state.event_mut(key, seq) else {
            return EventUpdate::Missing;
        };
        let was_resolved = event.is_resolved();
        event.last_checked_at_ms = Some(now_ms);
        event.pending.retain(|c| still_pending.contains(c));
        if event.pending.is_empty() {
            event.resolve(now_ms);
        }
        EventUpdate::of(was_resolved, event)
    }

    // -----------------------------------------------------------------------
    // Expiry and release
    // -----------------------------------------------------------------------

    /// Expire every unresolved event past its deadline.
    ///
    /// A timer-based event with nothing left pending completes as resolved;
    /// every other expired event is removed and returned.
    pub fn take_expired(&self, now_ms: u64) -> Vec<Expiry<S>> {
        let mut state = self.lock();
        let mut out = Vec::new();
        let mut emptied = Vec::new();
        for (key, lane) in &mut state.lanes {
            let mut kept = VecDeque::with_capacity(lane.queue.len());
            for mut event in lane.queue.drain(..) {
                if !event.is_expired(now_ms) {
                    kept.push_back(event);
                } else if event.timer_based && event.pending.is_empty() {
                    event.resolve(now_ms);
                    out.push(Expiry::Completed {
                        key: key.clone(),
                        seq: event.seq,
                    });
                    kept.push_back(event);
                } else {
                    out.push(Expiry::Dropped(event));
                }
            }
            lane.queue = kept;
            if lane.is_idle() {
                emptied.push(key.clone());
            }
        }
        for key in &emptied {
            state.lanes.remove(key);
        }
        out
    }

    /// Release the head of every lane that is resolved and has nothing in
    /// flight. Released events are marked in flight.
    pub fn release_ready(&self) -> Vec<DeferredEvent<S>> {
        let mut state = self.lock();
        let mut out = Vec::new();
        for lane in state.lanes.values_mut() {
            if let Some(event) = Self::release_head(lane) {
                out.push(event);
            }
        }
        out
    }

    /// Release the head of `key`'s lane if it is ready.
    pub fn release_key(&self, key: &ResourceKey) -> Option<DeferredEvent<S>> {
        let mut state = self.lock();
        Self::release_head(state.lanes.get_mut(key)?)
    }

    fn release_head(lane: &mut KeyLane<S>) -> Option<DeferredEvent<S>> {
        if lane.in_flight.is_some() || !lane.queue.front().is_some_and(DeferredEvent::is_resolved) {
            return None;
        }
        let event = lane.queue.pop_front()?;
        lane.in_flight = Some(InFlight {
            seq: event.seq,
            event_type: event.event_type(),
        });
        Some(event)
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Events waiting in the intake queue.
    pub fn intake_len(&self) -> usize {
        self.lock().intake.len()
    }

    /// Events waiting in lanes.
    #[cfg(test)]
    fn waiting_len(&self) -> usize {
        self.lock().lanes.values().map(|l| l.queue.len()).sum()
    }

    /// Keys with a lane (waiting or in flight).
    #[cfg(test)]
    fn key_count(&self) -> usize {
        self.lock().lanes.len()
    }

    /// Per-key depths, sorted by key.
    pub fn lane_infos(&self, now_ms: u64) -> Vec<LaneInfo> {
        let state = self.lock();
        let mut infos: Vec<LaneInfo> = state
            .lanes
            .iter()
            .map(|(key, lane)| LaneInfo {
                key: key.clone(),
                depth: lane.queue.len(),
                in_flight: lane.in_flight.map(|f| f.event_type),
                oldest_wait_ms: lane
                    .queue
                    .iter()
                    .map(|e| e.waited_ms(now_ms))
                    .max()
                    .unwrap_or(0),
            })
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    /// Wait state of every event in lanes and the intake queue, by key then seq.
    pub fn event_waits(&self, now_ms: u64) -> Vec<EventWait> {
        let state = self.lock();
        let mut waits: Vec<EventWait> = state
            .intake
            .iter()
            .chain(state.lanes.values().flat_map(|l| l.queue.iter()))
            .map(|e| EventWait {
                key: e.key.clone(),
                seq: e.seq,
                event_type: e.event_type(),
                waited_ms: e.waited_ms(now_ms),
                pending_conditions: e.pending.len(),
                timer_based: e.timer_based,
                ordering_only: e.ordering_only,
                resolved: e.is_resolved(),
                expires_in_ms: e.expires_at_ms.saturating_sub(now_ms),
            })
            .collect();
        waits.sort_by(|a, b| a.key.cmp(&b.key).then(a.seq.cmp(&b.seq)));
        waits
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ldh_types::{Change, View};

    use super::*;
    use crate::config::RetryPolicy;
    use crate::event::DeferRequest;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            retry_interval_ms: 100,
            expiry_retries: 10,
        }
    }

    fn placeholder(seq: u64, key: &str, change: Change<u32>) -> DeferredEvent<u32> {
        DeferredEvent::ordering_only(seq, key.into(), change, 0, &policy())
    }

    fn listening(seq: u64, key: &str, target: &str) -> DeferredEvent<u32> {
        DeferredEvent::deferred(
            seq,
            key.into(),
            Change::Add { new: 1 },
            DeferRequest::listen(vec![DependencyCondition::present(target, View::Desired)]),
            0,
            &policy(),
        )
    }

    #[test]
    fn pending_tail_prefers_intake_then_lane_then_in_flight() {
        let store = WaitingStore::new();
        let key = ResourceKey::new("/k");
        assert_eq!(store.pending_tail(&key), None);

        assert!(store.begin_immediate(&key, 1, EventType::Add));
        let tail = store.pending_tail(&key).unwrap();
        assert_eq!((tail.seq, tail.cancellable), (1, false));

        store.enqueue(placeholder(2, "/k", Change::Update { old: 1, new: 2 }));
        let tail = store.pending_tail(&key).unwrap();
        assert_eq!((tail.seq, tail.event_type, tail.cancellable), (2, EventType::Update, true));

        assert_eq!(store.drain_intake(), 1);
        assert_eq!(store.pending_tail(&key).unwrap().seq, 2);
        assert_eq!(store.intake_len(), 0);
        assert_eq!(store.waiting_len(), 1);
    }

    #[test]
    fn begin_immediate_refuses_busy_keys() {
        let store = WaitingStore::new();
        let key = ResourceKey::new("/k");
        store.enqueue(placeholder(1, "/k", Change::Add { new: 1 }));
        assert!(!store.begin_immediate(&key, 2, EventType::Update));
        assert!(store.begin_immediate(&ResourceKey::new("/other"), 3, EventType::Add));
    }

    #[test]
    fn cancel_is_idempotent() {
        let store = WaitingStore::new();
        let key = ResourceKey::new("/k");
        store.enqueue(placeholder(1, "/k", Change::Add { new: 1 }));
        assert!(store.cancel(&key, 1).is_some());
        assert!(store.cancel(&key, 1).is_none());

        store.enqueue(placeholder(2, "/k", Change::Add { new: 1 }));
        let _ = store.drain_intake();
        assert!(store.cancel(&key, 2).is_some());
        assert!(store.cancel(&key, 2).is_none());
        assert_eq!(store.key_count(), 0);
    }

    #[test]
    fn release_waits_for_head_and_in_flight() {
        let store = WaitingStore::new();
        let key = ResourceKey::new("/k");
        store.enqueue(listening(1, "/k", "/dep"));
        store.enqueue(placeholder(2, "/k", Change::Update { old: 1, new: 2 }));
        let _ = store.drain_intake();

        // Second event resolves first but must wait for the head.
        assert_eq!(store.mark_resolved(&key, 2, 5), EventUpdate::Resolved);
        assert!(store.release_ready().is_empty());

        assert_eq!(
            store.satisfy(&key, 1, &DependencyCondition::present("/dep", View::Desired), 6),
            EventUpdate::Resolved
        );
        let released = store.release_ready();
        assert_eq!(released.len(), 1);
        assert_eq!(released.first().unwrap().seq, 1);

        // Nothing more while seq 1 is in flight.
        assert!(store.release_key(&key).is_none());
        store.finish(&key, 1, None);
        assert_eq!(store.release_key(&key).unwrap().seq, 2);
        store.finish(&key, 2, None);
        assert_eq!(store.key_count(), 0);
    }

    #[test]
    fn deferral_retakes_the_head_position() {
        let store = WaitingStore::new();
        let key = ResourceKey::new("/k");
        assert!(store.begin_immediate(&key, 1, EventType::Add));
        store.enqueue(placeholder(2, "/k", Change::Update { old: 1, new: 2 }));
        let _ = store.drain_intake();
        let _ = store.mark_resolved(&key, 2, 0);

        store.finish(&key, 1, Some(listening(1, "/k", "/dep")));
        // The deferred seq 1 is unresolved at the head, so seq 2 stays put.
        assert!(store.release_ready().is_empty());
        let waits = store.event_waits(0);
        assert_eq!(waits.iter().map(|w| w.seq).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(
            waits.iter().map(|w| w.ordering_only).collect::<Vec<_>>(),
            vec![false, true]
        );
    }

    #[test]
    fn timer_checks_and_expiry() {
        let store = WaitingStore::new();
        let key = ResourceKey::new("/k");
        let cond = DependencyCondition::present("/dep", View::Desired);
        store.enqueue(DeferredEvent::deferred(
            1,
            key.clone(),
            Change::Add { new: 1 },
            DeferRequest::poll(vec![cond.clone()]).expire_after(500),
            0,
            &policy(),
        ));
        store.enqueue(placeholder(2, "/other", Change::Remove { old: 1 }));
        let _ = store.drain_intake();

        let due = store.due_timer_checks(50);
        assert_eq!(due.len(), 1, "only the placeholder is due before one interval");
        assert_eq!(due.first().unwrap().seq, 2);

        let due = store.due_timer_checks(100);
        assert_eq!(due.len(), 2);
        assert_eq!(
            store.apply_timer_check(&key, 1, std::slice::from_ref(&cond), 100),
            EventUpdate::Pending
        );
        assert!(store.due_timer_checks(150).iter().all(|c| c.seq != 1));

        let expired = store.take_expired(501);
        assert!(matches!(expired.as_slice(), [Expiry::Dropped(e)] if e.seq == 1));
        // The placeholder has nothing pending: it completes instead.
        let expired = store.take_expired(1_001);
        assert!(matches!(expired.as_slice(), [Expiry::Completed { seq: 2, .. }]));
        assert_eq!(store.release_ready().len(), 1);
    }

    #[test]
    fn registration_drops_pre_resolved_conditions() {
        let store = WaitingStore::new();
        let key = ResourceKey::new("/k");
        store.enqueue(listening(1, "/k", "/dep"));
        let _ = store.drain_intake();

        let requests = store.registration_requests();
        assert_eq!(requests.len(), 1);
        let conditions = requests.first().unwrap().conditions.clone();
        assert_eq!(
            store.apply_registration(&key, 1, &conditions, 7),
            EventUpdate::Resolved
        );
        assert!(store.registration_requests().is_empty());
        assert_eq!(
            store.apply_registration(&ResourceKey::new("/gone"), 9, &[], 7),
            EventUpdate::Missing
        );
    }

    #[test]
    fn lane_infos_report_depth_and_age() {
        let store = WaitingStore::new();
        assert!(store.begin_immediate(&ResourceKey::new("/a"), 1, EventType::Add));
        store.enqueue(placeholder(2, "/a", Change::Update { old: 1, new: 2 }));
        let _ = store.drain_intake();
        let infos = store.lane_infos(40);
        assert_eq!(
            infos,
            vec![LaneInfo {
                key: ResourceKey::new("/a"),
                depth: 1,
                in_flight: Some(EventType::Add),
                oldest_wait_ms: 40,
            }]
        );
    }
}
