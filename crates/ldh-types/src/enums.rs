//! Enumeration types shared by the scheduler and its consumers.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// The kind of change a notification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A resource came into existence.
    Add,
    /// An existing resource changed.
    Update,
    /// A resource was deleted.
    Remove,
}

impl EventType {
    /// All event types, in table order.
    pub const ALL: [Self; 3] = [Self::Add, Self::Update, Self::Remove];

    /// Lower-case name used in logs and dumps.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Remove => "remove",
        }
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Store views
// ---------------------------------------------------------------------------

/// Logical partition of the backing store a condition is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    /// Intended state, as written by operators and northbound clients.
    Desired,
    /// State reported back by the data plane.
    Observed,
}

impl View {
    /// Lower-case name used in logs and dumps.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Desired => "desired",
            Self::Observed => "observed",
        }
    }
}

impl core::fmt::Display for View {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Presence transitions
// ---------------------------------------------------------------------------

/// A membership transition reported by a wildcard subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// The key now exists under the subscribed view.
    Appeared,
    /// The key no longer exists under the subscribed view.
    Disappeared,
}

impl Presence {
    /// Whether this transition leaves the key present.
    pub const fn is_present(self) -> bool {
        matches!(self, Self::Appeared)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn event_type_serializes_snake_case() {
        let json = serde_json::to_string(&EventType::Remove).unwrap();
        assert_eq!(json, "\"remove\"");
        let back: EventType = serde_json::from_str("\"update\"").unwrap();
        assert_eq!(back, EventType::Update);
    }

    #[test]
    fn view_display_matches_serde_name() {
        for view in [View::Desired, View::Observed] {
            let json = serde_json::to_string(&view).unwrap();
            assert_eq!(json, format!("\"{view}\""));
        }
    }

    #[test]
    fn presence_polarity() {
        assert!(Presence::Appeared.is_present());
        assert!(!Presence::Disappeared.is_present());
    }
}
