//! The payload carried by a change event.
//!
//! The scheduler never inspects snapshots. It only moves them from the
//! notification source to the consumer callback that matches the event
//! type.

use serde::{Deserialize, Serialize};

use crate::enums::EventType;

/// A change to one keyed resource, with the snapshots relevant to its kind.
///
/// ADD carries the new snapshot, REMOVE the old one, UPDATE both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Change<S> {
    /// The resource was created.
    Add {
        /// Snapshot after the change.
        new: S,
    },
    /// The resource was modified.
    Update {
        /// Snapshot before the change.
        old: S,
        /// Snapshot after the change.
        new: S,
    },
    /// The resource was deleted.
    Remove {
        /// Snapshot before the change.
        old: S,
    },
}

impl<S> Change<S> {
    /// The event type of this change.
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::Add { .. } => EventType::Add,
            Self::Update { .. } => EventType::Update,
            Self::Remove { .. } => EventType::Remove,
        }
    }

    /// Snapshot before the change, if the kind carries one.
    pub const fn old(&self) -> Option<&S> {
        match self {
            Self::Add { .. } => None,
            Self::Update { old, .. } | Self::Remove { old } => Some(old),
        }
    }

    /// Snapshot after the change, if the kind carries one.
    pub const fn new_snapshot(&self) -> Option<&S> {
        match self {
            Self::Add { new } | Self::Update { new, .. } => Some(new),
            Self::Remove { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshots_follow_event_type() {
        let add = Change::Add { new: 1 };
        assert_eq!(add.event_type(), EventType::Add);
        assert_eq!(add.old(), None);
        assert_eq!(add.new_snapshot(), Some(&1));

        let update = Change::Update { old: 1, new: 2 };
        assert_eq!(update.event_type(), EventType::Update);
        assert_eq!(update.old(), Some(&1));
        assert_eq!(update.new_snapshot(), Some(&2));

        let remove = Change::Remove { old: 2 };
        assert_eq!(remove.event_type(), EventType::Remove);
        assert_eq!(remove.old(), Some(&2));
        assert_eq!(remove.new_snapshot(), None);
    }
}
