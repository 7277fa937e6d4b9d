//! One consumer's scheduler engine.
//!
//! An [`Engine`] owns every piece of state for one consumer: the waiting
//! store, the wildcard registry, the settle buffer and the dispatcher. It
//! has two entry points:
//!
//! - [`Engine::on_change`] / [`Engine::defer`], called by the notification
//!   source for each raw change, which run the intake guard and either
//!   dispatch at once or queue;
//! - [`Engine::tick`], called by the poller, which moves queued events
//!   forward one step:
//!
//! 0. apply store notifications queued since the last tick
//! 1. drain the intake queue into per-key lanes
//! 2. register listener-based events with the wildcard registry
//! 3. poll timer-based events whose retry interval has elapsed
//! 4. expire events past their deadline
//! 5. move resolved lane heads into the settle buffer
//! 6. dispatch settle-buffer entries whose dwell has elapsed
//!
//! `tick` is synchronous; the scheduler runs it on the blocking pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ldh_types::{Change, DependencyCondition, ResourceKey};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::{LdhConfig, RetryConfig};
use crate::consumer::{Consumer, Disposition};
use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::event::{DeferRequest, DeferredEvent, DispatchItem};
use crate::intake::{self, IntakeDecision, IntakeOutcome, PendingEntry};
use crate::locks::StripedLocks;
use crate::registry::{Registration, WildcardRegistry};
use crate::settle::SettleBuffer;
use crate::stats::{Counter, CounterSnapshot, EngineDump, EngineStats, TickReport};
use crate::store::{DataStore, WildcardNotification};
use crate::waiting::{EventUpdate, Expiry, WaitingStore};

/// Scheduler engine for one consumer. Cheap to clone.
pub struct Engine<C: Consumer> {
    core: Arc<EngineCore<C>>,
}

impl<C: Consumer> Clone for Engine<C> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<C: Consumer> core::fmt::Debug for Engine<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("consumer", &self.core.consumer.name())
            .finish_non_exhaustive()
    }
}

/// State shared by the engine handle, the poller and dispatch completions.
struct EngineCore<C: Consumer> {
    consumer: Arc<C>,
    store: Arc<dyn DataStore>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    next_seq: AtomicU64,
    /// Serializes intake decisions and dispatch completions per key.
    key_locks: StripedLocks,
    /// Serializes ticks.
    tick_lock: Mutex<()>,
    waiting: WaitingStore<C::Snapshot>,
    registry: WildcardRegistry,
    notifications: Mutex<UnboundedReceiver<WildcardNotification>>,
    settle: SettleBuffer<C::Snapshot>,
    dispatcher: Dispatcher,
    stats: EngineStats,
}

impl<C: Consumer> Engine<C> {
    /// Create an engine delivering to `consumer`.
    ///
    /// Must be called inside a tokio runtime; dispatches are spawned on it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoRuntime`] outside a runtime.
    pub fn new(
        consumer: C,
        store: Arc<dyn DataStore>,
        clock: Arc<dyn Clock>,
        config: &LdhConfig,
    ) -> Result<Self, EngineError> {
        let dispatcher = Dispatcher::new(config.scheduler.dispatch_workers)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let registry =
            WildcardRegistry::new(Arc::clone(&store), tx, config.scheduler.lock_stripes);
        info!(
            consumer = consumer.name(),
            settle_delay_ms = config.scheduler.settle_delay_ms,
            dispatch_workers = config.scheduler.dispatch_workers,
            "engine created"
        );
        Ok(Self {
            core: Arc::new(EngineCore {
                consumer: Arc::new(consumer),
                store,
                clock,
                retry: config.retry.clone(),
                next_seq: AtomicU64::new(1),
                key_locks: StripedLocks::new(config.scheduler.lock_stripes),
                tick_lock: Mutex::new(()),
                waiting: WaitingStore::new(),
                registry,
                notifications: Mutex::new(rx),
                settle: SettleBuffer::new(config.scheduler.settle_delay_ms),
                dispatcher,
                stats: EngineStats::default(),
            }),
        })
    }

    /// Name of the consumer this engine serves.
    pub fn name(&self) -> &str {
        self.core.consumer.name()
    }

    /// The consumer this engine serves.
    pub fn consumer(&self) -> &C {
        &self.core.consumer
    }

    /// Accept a raw change notification for `key`.
    ///
    /// With nothing outstanding for the key the consumer is called at once;
    /// otherwise the event queues behind the outstanding one, or is
    /// suppressed if the pair is an impossible sequence.
    pub fn on_change(&self, key: ResourceKey, change: Change<C::Snapshot>) -> IntakeOutcome {
        self.core.admit(key, change, None)
    }

    /// Queue an event that must wait for `request`'s conditions.
    ///
    /// Runs the same intake guard as [`Self::on_change`], but the event
    /// always queues rather than dispatching at once.
    pub fn defer(
        &self,
        key: ResourceKey,
        change: Change<C::Snapshot>,
        request: DeferRequest,
    ) -> IntakeOutcome {
        self.core.admit(key, change, Some(request))
    }

    /// Run one poller pass.
    pub fn tick(&self) -> TickReport {
        self.core.tick()
    }

    /// Snapshot of queues, subscriptions and counters.
    pub fn dump(&self) -> EngineDump {
        self.core.dump()
    }

    /// Lifetime counters.
    pub fn stats(&self) -> CounterSnapshot {
        self.core.stats.snapshot()
    }

    /// Wait until no consumer callback is running or waiting for a worker.
    pub async fn quiesce(&self) {
        self.core.dispatcher.wait_idle().await;
    }
}

impl<C: Consumer> EngineCore<C> {
    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    // -----------------------------------------------------------------------
    // Intake
    // -----------------------------------------------------------------------

    fn admit(
        self: &Arc<Self>,
        key: ResourceKey,
        change: Change<C::Snapshot>,
        request: Option<DeferRequest>,
    ) -> IntakeOutcome {
        let consumer = self.consumer.name();
        let event_type = change.event_type();
        if key.is_empty() {
            warn!(consumer, %event_type, "dropping notification with an empty key");
            self.stats.bump(Counter::Malformed);
            return IntakeOutcome::Malformed;
        }

        let _key_guard = self.key_locks.lock(&key);
        let pending = self.waiting.pending_tail(&key);
        let decision = intake::decide(event_type, pending.map(|p| p.event_type));

        if decision == IntakeDecision::Suppress {
            warn!(
                consumer,
                key = %key,
                %event_type,
                pending = ?pending.map(|p| p.event_type),
                "suppressing out-of-order event"
            );
            self.stats.bump(Counter::Suppressed);
            return IntakeOutcome::Suppressed;
        }

        let seq = self.next_seq();
        if decision == IntakeDecision::ProcessNow
            && request.is_none()
            && self.waiting.begin_immediate(&key, seq, event_type)
        {
            debug!(consumer, key = %key, seq, %event_type, "processing now");
            self.stats.bump(Counter::ProcessedNow);
            self.dispatch(DispatchItem { seq, key, change });
            return IntakeOutcome::Dispatched { seq };
        }

        let cancelled = match (decision, pending) {
            (IntakeDecision::CancelPendingAndQueue, Some(p)) => self.cancel_pending(&key, p),
            (IntakeDecision::QueueSuperseding, _) => {
                debug!(consumer, key = %key, seq, "remove queued behind pending update");
                None
            }
            _ => None,
        };

        let now = self.clock.now_ms();
        let event = match request {
            Some(request) => {
                self.stats.bump(Counter::Deferred);
                self.deferred_event(seq, key, change, request, now)
            }
            None => {
                let policy = self.retry.policy(event_type);
                DeferredEvent::ordering_only(seq, key, change, now, policy)
            }
        };
        debug!(consumer, key = %event.key, seq, %event_type, "queued");
        self.waiting.enqueue(event);
        self.stats.bump(Counter::Queued);
        IntakeOutcome::Queued { seq, cancelled }
    }

    /// Withdraw a pending ADD superseded by a REMOVE.
    ///
    /// An ADD already released for dispatch stays; the REMOVE queues behind it.
    fn cancel_pending(&self, key: &ResourceKey, pending: PendingEntry) -> Option<u64> {
        if !pending.cancellable {
            debug!(consumer = self.consumer.name(), key = %key, seq = pending.seq, "pending add already dispatching");
            return None;
        }
        let event = self.waiting.cancel(key, pending.seq)?;
        if event.registered && !event.timer_based {
            self.registry.unregister(key, event.seq, &event.pending);
        }
        info!(
            consumer = self.consumer.name(),
            key = %key,
            seq = event.seq,
            "pending add cancelled by remove"
        );
        self.stats.bump(Counter::Cancelled);
        Some(event.seq)
    }

    /// Build a consumer-requested deferral, filling in shared patterns.
    fn deferred_event(
        &self,
        seq: u64,
        key: ResourceKey,
        change: Change<C::Snapshot>,
        mut request: DeferRequest,
        now_ms: u64,
    ) -> DeferredEvent<C::Snapshot> {
        for condition in &mut request.dependencies {
            self.share_pattern(condition);
        }
        let policy = self.retry.policy(change.event_type());
        DeferredEvent::deferred(seq, key, change, request, now_ms, policy)
    }

    fn share_pattern(&self, condition: &mut DependencyCondition) {
        if condition.is_shared() {
            return;
        }
        let Some(pattern) = self.consumer.wildcard_path_of(&condition.target) else {
            return;
        };
        if condition.target.matches(&pattern) {
            condition.pattern = pattern;
        } else {
            warn!(
                consumer = self.consumer.name(),
                target = %condition.target,
                pattern = %pattern,
                "wildcard path does not cover its target; not sharing"
            );
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    fn dispatch(self: &Arc<Self>, item: DispatchItem<C::Snapshot>) {
        let consumer = Arc::clone(&self.consumer);
        let core = Arc::clone(self);
        let key = item.key.clone();
        let seq = item.seq;
        self.stats.bump(Counter::Dispatched);
        self.dispatcher.submit(
            move || {
                let disposition = deliver(consumer.as_ref(), &item);
                (disposition, item)
            },
            move |result| match result {
                Ok((disposition, item)) => core.complete(item, disposition),
                Err(e) => {
                    error!(
                        consumer = core.consumer.name(),
                        key = %key,
                        seq,
                        error = %e,
                        "consumer callback failed"
                    );
                    core.stats.bump(Counter::DispatchPanics);
                    core.finish(&key, seq, None);
                }
            },
        );
    }

    fn complete(&self, item: DispatchItem<C::Snapshot>, disposition: Disposition) {
        let deferral = match disposition {
            Disposition::Done => None,
            Disposition::Defer(request) => {
                debug!(
                    consumer = self.consumer.name(),
                    key = %item.key,
                    seq = item.seq,
                    dependencies = request.dependencies.len(),
                    "consumer deferred event"
                );
                self.stats.bump(Counter::Deferred);
                let now = self.clock.now_ms();
                Some(self.deferred_event(item.seq, item.key.clone(), item.change, request, now))
            }
        };
        self.finish(&item.key, item.seq, deferral);
    }

    /// Close out a dispatch and release the key's next resolved event.
    fn finish(
        &self,
        key: &ResourceKey,
        seq: u64,
        deferral: Option<DeferredEvent<C::Snapshot>>,
    ) {
        let _key_guard = self.key_locks.lock(key);
        self.waiting.finish(key, seq, deferral);
        if let Some(next) = self.waiting.release_key(key) {
            let now = self.clock.now_ms();
            self.settle(next, now);
        }
    }

    fn settle(&self, event: DeferredEvent<C::Snapshot>, now_ms: u64) {
        let resolved_at = event.resolved_at_ms.unwrap_or(now_ms);
        self.settle.push(event.into_dispatch(), resolved_at);
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    fn tick(self: &Arc<Self>) -> TickReport {
        let _tick = self.tick_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now_ms();
        let mut report = TickReport::default();

        self.apply_notifications(now, &mut report);

        report.dequeued = self.waiting.drain_intake();
        self.stats.add(Counter::Dequeued, as_count(report.dequeued));

        self.register_listeners(now, &mut report);
        self.check_timers(now, &mut report);
        self.expire(now, &mut report);

        for event in self.waiting.release_ready() {
            self.settle(event, now);
            report.released = report.released.saturating_add(1);
        }

        for item in self.settle.drain_settled(now) {
            self.dispatch(item);
            report.dispatched = report.dispatched.saturating_add(1);
        }

        self.stats.add(Counter::Resolved, as_count(report.resolved));
        if !report.is_idle() {
            debug!(consumer = self.consumer.name(), ?report, "tick");
        }
        report
    }

    fn apply_notifications(&self, now_ms: u64, report: &mut TickReport) {
        let queued: Vec<WildcardNotification> = {
            let mut rx = self
                .notifications
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };
        for notification in &queued {
            report.notifications = report.notifications.saturating_add(1);
            for satisfied in self.registry.apply_notification(notification) {
                let update = self.waiting.satisfy(
                    &satisfied.key,
                    satisfied.seq,
                    &satisfied.condition,
                    now_ms,
                );
                if update == EventUpdate::Resolved {
                    report.resolved = report.resolved.saturating_add(1);
                }
            }
        }
        self.stats
            .add(Counter::Notifications, as_count(report.notifications));
    }

    fn register_listeners(&self, now_ms: u64, report: &mut TickReport) {
        for request in self.waiting.registration_requests() {
            report.registered = report.registered.saturating_add(1);
            let (key, seq) = (&request.key, request.seq);
            let update = match self.registry.register_or_reuse(key, seq, &request.conditions) {
                Registration::AllPreResolved => {
                    self.waiting
                        .apply_registration(key, seq, &request.conditions, now_ms)
                }
                Registration::Registered { pre_resolved } => {
                    let update = self.waiting.apply_registration(key, seq, &pre_resolved, now_ms);
                    if update == EventUpdate::Missing {
                        // Cancelled while registering.
                        let registered: Vec<DependencyCondition> = request
                            .conditions
                            .iter()
                            .filter(|c| !pre_resolved.contains(c))
                            .cloned()
                            .collect();
                        self.registry.unregister(key, seq, &registered);
                    }
                    update
                }
                Registration::NoDependencies => self.waiting.mark_resolved(key, seq, now_ms),
                Registration::SubscribeFailed => self.waiting.fall_back_to_timer(key, seq),
            };
            if update == EventUpdate::Resolved {
                report.resolved = report.resolved.saturating_add(1);
            }
        }
    }

    fn check_timers(&self, now_ms: u64, report: &mut TickReport) {
        for check in self.waiting.due_timer_checks(now_ms) {
            report.checked = report.checked.saturating_add(1);
            let still_pending: Vec<DependencyCondition> = check
                .conditions
                .into_iter()
                .filter(|c| !self.holds(c))
                .collect();
            let update = self
                .waiting
                .apply_timer_check(&check.key, check.seq, &still_pending, now_ms);
            if update == EventUpdate::Resolved {
                report.resolved = report.resolved.saturating_add(1);
            }
        }
    }

    fn expire(&self, now_ms: u64, report: &mut TickReport) {
        for expiry in self.waiting.take_expired(now_ms) {
            match expiry {
                Expiry::Completed { key, seq } => {
                    debug!(consumer = self.consumer.name(), key = %key, seq, "ordering event completed at expiry");
                    report.completed_on_expiry = report.completed_on_expiry.saturating_add(1);
                    self.stats.bump(Counter::CompletedOnExpiry);
                }
                Expiry::Dropped(event) => {
                    if event.registered && !event.timer_based {
                        self.registry.unregister(&event.key, event.seq, &event.pending);
                    }
                    info!(
                        consumer = self.consumer.name(),
                        key = %event.key,
                        seq = event.seq,
                        event_type = %event.event_type(),
                        pending = event.pending.len(),
                        waited_ms = event.waited_ms(now_ms),
                        "event expired before its dependencies resolved"
                    );
                    report.expired = report.expired.saturating_add(1);
                    self.stats.bump(Counter::Expired);
                }
            }
        }
    }

    /// Point read of a condition. Read failures count as not holding.
    fn holds(&self, condition: &DependencyCondition) -> bool {
        match self.store.read(&condition.target, condition.view) {
            Ok(record) => condition.is_satisfied_by(record.is_some()),
            Err(e) => {
                debug!(condition = %condition, error = %e, "dependency read failed");
                false
            }
        }
    }

    fn dump(&self) -> EngineDump {
        let now = self.clock.now_ms();
        EngineDump {
            consumer: self.consumer.name().to_owned(),
            intake_depth: self.waiting.intake_len(),
            lanes: self.waiting.lane_infos(now),
            settle_depth: self.settle.len(),
            dispatching: self.dispatcher.active(),
            subscriptions: self.registry.infos(),
            events: self.waiting.event_waits(now),
            counters: self.stats.snapshot(),
        }
    }
}

/// Invoke the callback matching the change.
fn deliver<C: Consumer>(consumer: &C, item: &DispatchItem<C::Snapshot>) -> Disposition {
    match &item.change {
        Change::Add { new } => consumer.on_add(&item.key, new),
        Change::Update { old, new } => consumer.on_update(&item.key, old, new),
        Change::Remove { old } => consumer.on_remove(&item.key, old),
    }
}

fn as_count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}
