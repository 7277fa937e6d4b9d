//! Shared type definitions for the LDH event dependency scheduler.
//!
//! This crate holds the vocabulary shared by the scheduler core and its
//! consumers: resource keys and wildcard patterns, change events, and the
//! dependency conditions a deferred event waits on.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for subscription identifiers
//! - [`key`] -- Path-shaped resource keys with `*` wildcard segments
//! - [`enums`] -- Event types, store views, presence transitions
//! - [`change`] -- The ADD/UPDATE/REMOVE payload carried by an event
//! - [`condition`] -- Dependency conditions gating a deferred event

pub mod change;
pub mod condition;
pub mod enums;
pub mod ids;
pub mod key;

// Re-export all public types at crate root for convenience.
pub use change::Change;
pub use condition::DependencyCondition;
pub use enums::{EventType, Presence, View};
pub use ids::SubscriptionId;
pub use key::{ResourceKey, WILDCARD_SEGMENT};
