//! Event intake and reordering guard.
//!
//! Every raw change notification is checked against the newest event
//! still outstanding for the same key (queued, waiting, settling or being
//! dispatched) before it is accepted:
//!
//! | current \ pending | ADD | UPDATE | REMOVE |
//! |---|---|---|---|
//! | ADD | suppress | suppress | queue |
//! | UPDATE | queue | queue | suppress |
//! | REMOVE | cancel pending ADD, queue | queue (superseding) | suppress |
//!
//! With nothing outstanding the event is processed immediately. A
//! suppressed combination means the notification source broke its own
//! ordering contract; the incoming event is dropped and logged.
//!
//! This module is pure decision logic. The engine applies the decision
//! under the key's stripe lock.

use ldh_types::EventType;
use serde::Serialize;

/// What to do with an incoming event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeDecision {
    /// Nothing outstanding for the key: dispatch right away.
    ProcessNow,
    /// Queue behind the outstanding event.
    Queue,
    /// REMOVE behind an UPDATE: the UPDATE still runs first.
    QueueSuperseding,
    /// REMOVE behind an ADD: drop the ADD if it can still be cancelled,
    /// then queue the REMOVE.
    CancelPendingAndQueue,
    /// Inconsistent sequence from the source: drop the incoming event.
    Suppress,
}

/// Decide what to do with a `current` event given the newest outstanding
/// event type for its key.
pub const fn decide(current: EventType, pending: Option<EventType>) -> IntakeDecision {
    let Some(pending) = pending else {
        return IntakeDecision::ProcessNow;
    };
    match (current, pending) {
        (EventType::Add, EventType::Remove)
        | (EventType::Update, EventType::Add | EventType::Update) => IntakeDecision::Queue,
        (EventType::Remove, EventType::Update) => IntakeDecision::QueueSuperseding,
        (EventType::Remove, EventType::Add) => IntakeDecision::CancelPendingAndQueue,
        (EventType::Add, EventType::Add | EventType::Update)
        | (EventType::Update | EventType::Remove, EventType::Remove) => IntakeDecision::Suppress,
    }
}

/// The newest outstanding event for a key, as seen by the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingEntry {
    /// Arrival sequence of the outstanding event.
    pub seq: u64,
    /// Its event type.
    pub event_type: EventType,
    /// Whether it can still be withdrawn (not yet released for dispatch).
    pub cancellable: bool,
}

/// Outcome of handing one notification to an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeOutcome {
    /// The key was empty; nothing was done.
    Malformed,
    /// The event was dropped as an invalid sequence.
    Suppressed,
    /// The event went straight to the dispatcher.
    Dispatched {
        /// Sequence assigned to the event.
        seq: u64,
    },
    /// The event was queued behind outstanding work.
    Queued {
        /// Sequence assigned to the event.
        seq: u64,
        /// Sequence of the ADD this REMOVE withdrew, if any.
        cancelled: Option<u64>,
    },
}
