//! Deferred events and the requests that create them.

use ldh_types::{Change, DependencyCondition, EventType, ResourceKey};

use crate::config::RetryPolicy;

/// A consumer's request to postpone an event until its dependencies hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferRequest {
    /// Conditions that must all hold before the event is redelivered.
    pub dependencies: Vec<DependencyCondition>,
    /// `true` to re-check by polling, `false` to wait on wildcard subscriptions.
    pub timer_based: bool,
    /// Re-check interval; the event type's default when `None`.
    pub retry_interval_ms: Option<u64>,
    /// Total wait budget; the event type's default when `None`.
    pub expiry_ms: Option<u64>,
}

impl DeferRequest {
    /// Wait for `dependencies` through wildcard subscriptions.
    pub const fn listen(dependencies: Vec<DependencyCondition>) -> Self {
        Self {
            dependencies,
            timer_based: false,
            retry_interval_ms: None,
            expiry_ms: None,
        }
    }

    /// Wait for `dependencies` by re-reading them every retry interval.
    pub const fn poll(dependencies: Vec<DependencyCondition>) -> Self {
        Self {
            dependencies,
            timer_based: true,
            retry_interval_ms: None,
            expiry_ms: None,
        }
    }

    /// Override the re-check interval.
    #[must_use]
    pub const fn retry_every(mut self, ms: u64) -> Self {
        self.retry_interval_ms = Some(ms);
        self
    }

    /// Override the total wait budget.
    #[must_use]
    pub const fn expire_after(mut self, ms: u64) -> Self {
        self.expiry_ms = Some(ms);
        self
    }
}

/// One pending unit of work.
///
/// Lives in exactly one place at a time: the intake queue, a per-key lane
/// of the waiting store, the settle buffer, or the dispatcher.
#[derive(Debug, Clone)]
pub struct DeferredEvent<S> {
    /// Arrival sequence; fixes the event's position within its key.
    pub seq: u64,
    /// Resource the event is about.
    pub key: ResourceKey,
    /// The change and its snapshots.
    pub change: Change<S>,
    /// Conditions not yet observed to hold.
    pub pending: Vec<DependencyCondition>,
    /// Resolved by polling rather than by subscription.
    pub timer_based: bool,
    /// Created by the intake guard purely to keep per-key order.
    pub ordering_only: bool,
    /// Listener registration has been performed.
    pub registered: bool,
    /// When the event entered the scheduler.
    pub queued_at_ms: u64,
    /// Deadline after which an unresolved event expires.
    pub expires_at_ms: u64,
    /// Last poll of the conditions; `None` means due immediately.
    pub last_checked_at_ms: Option<u64>,
    /// Interval between polls.
    pub retry_interval_ms: u64,
    /// When the last condition was observed to hold.
    pub resolved_at_ms: Option<u64>,
}

impl<S> DeferredEvent<S> {
    /// An ordering placeholder: no dependencies, eligible on the next tick.
    pub fn ordering_only(
        seq: u64,
        key: ResourceKey,
        change: Change<S>,
        now_ms: u64,
        policy: &RetryPolicy,
    ) -> Self {
        Self {
            seq,
            key,
            change,
            pending: Vec::new(),
            timer_based: true,
            ordering_only: true,
            registered: false,
            queued_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(policy.expiry_ms()),
            last_checked_at_ms: None,
            retry_interval_ms: policy.retry_interval_ms,
            resolved_at_ms: None,
        }
    }

    /// An event deferred on the consumer's request.
    ///
    /// The consumer has just checked the dependencies, so the first poll of
    /// a timer-based event waits one full retry interval.
    pub fn deferred(
        seq: u64,
        key: ResourceKey,
        change: Change<S>,
        request: DeferRequest,
        now_ms: u64,
        policy: &RetryPolicy,
    ) -> Self {
        let retry_interval_ms = request
            .retry_interval_ms
            .unwrap_or(policy.retry_interval_ms)
            .max(1);
        let expiry_ms = request.expiry_ms.unwrap_or_else(|| policy.expiry_ms());
        Self {
            seq,
            key,
            change,
            pending: request.dependencies,
            timer_based: request.timer_based,
            ordering_only: false,
            registered: false,
            queued_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(expiry_ms),
            last_checked_at_ms: Some(now_ms),
            retry_interval_ms,
            resolved_at_ms: None,
        }
    }

    /// The event's type.
    pub const fn event_type(&self) -> EventType {
        self.change.event_type()
    }

    /// Whether every condition has been observed to hold.
    pub const fn is_resolved(&self) -> bool {
        self.resolved_at_ms.is_some()
    }

    /// Mark the event resolved at `now_ms` (first resolution wins).
    pub fn resolve(&mut self, now_ms: u64) {
        self.pending.clear();
        if self.resolved_at_ms.is_none() {
            self.resolved_at_ms = Some(now_ms);
        }
    }

    /// Drop one satisfied condition; resolves the event if it was the last.
    ///
    /// Returns `false` if the condition was not pending.
    pub fn satisfy(&mut self, condition: &DependencyCondition, now_ms: u64) -> bool {
        let Some(pos) = self.pending.iter().position(|c| c == condition) else {
            return false;
        };
        self.pending.remove(pos);
        if self.pending.is_empty() {
            self.resolve(now_ms);
        }
        true
    }

    /// Unresolved and past its deadline.
    pub const fn is_expired(&self, now_ms: u64) -> bool {
        !self.is_resolved() && now_ms > self.expires_at_ms
    }

    /// Timer-based, unresolved, and its retry interval has elapsed.
    pub fn is_check_due(&self, now_ms: u64) -> bool {
        self.timer_based
            && !self.is_resolved()
            && self
                .last_checked_at_ms
                .is_none_or(|last| now_ms >= last.saturating_add(self.retry_interval_ms))
    }

    /// Listener-based and not yet registered with the wildcard registry.
    pub const fn needs_registration(&self) -> bool {
        !self.timer_based && !self.registered && !self.is_resolved()
    }

    /// Milliseconds spent in the scheduler so far.
    pub const fn waited_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.queued_at_ms)
    }

    /// Strip scheduling state for dispatch.
    pub fn into_dispatch(self) -> DispatchItem<S> {
        DispatchItem {
            seq: self.seq,
            key: self.key,
            change: self.change,
        }
    }
}

/// An event on its way to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchItem<S> {
    /// Arrival sequence.
    pub seq: u64,
    /// Resource the event is about.
    pub key: ResourceKey,
    /// The change and its snapshots.
    pub change: Change<S>,
}

#[cfg(test)]
mod tests {
    use ldh_types::View;

    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            retry_interval_ms: 1000,
            expiry_retries: 10,
        }
    }

    #[test]
    fn ordering_only_is_due_immediately() {
        let event =
            DeferredEvent::ordering_only(1, "/a".into(), Change::Add { new: () }, 500, &policy());
        assert!(event.is_check_due(500));
        assert_eq!(event.expires_at_ms, 10_500);
        assert!(!event.needs_registration());
    }

    #[test]
    fn deferred_poll_waits_one_interval() {
        let request = DeferRequest::poll(vec![DependencyCondition::present("/b", View::Desired)])
            .retry_every(200)
            .expire_after(1_000);
        let event = DeferredEvent::deferred(
            2,
            "/a".into(),
            Change::Remove { old: () },
            request,
            1_000,
            &policy(),
        );
        assert!(!event.is_check_due(1_199));
        assert!(event.is_check_due(1_200));
        assert_eq!(event.expires_at_ms, 2_000);
        assert!(!event.is_expired(2_000));
        assert!(event.is_expired(2_001));
    }

    #[test]
    fn satisfying_last_condition_resolves() {
        let a = DependencyCondition::present("/x", View::Desired);
        let b = DependencyCondition::absent("/y", View::Observed);
        let mut event = DeferredEvent::deferred(
            3,
            "/k".into(),
            Change::Add { new: () },
            DeferRequest::listen(vec![a.clone(), b.clone()]),
            0,
            &policy(),
        );
        assert!(event.needs_registration());
        assert!(event.satisfy(&a, 10));
        assert!(!event.is_resolved());
        assert!(!event.satisfy(&a, 11));
        assert!(event.satisfy(&b, 12));
        assert_eq!(event.resolved_at_ms, Some(12));
        assert!(!event.is_expired(u64::MAX));
    }
}
