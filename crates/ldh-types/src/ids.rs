//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Identifiers use UUID v7 (time-ordered) so that dumps sorted by ID read
//! in creation order.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Identifier of one live wildcard subscription against the store.
    ///
    /// A fresh identifier is minted every time a subscription is created,
    /// so notifications from a torn-down subscription can be told apart
    /// from notifications of its replacement on the same pattern.
    SubscriptionId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let first = SubscriptionId::new();
        let second = SubscriptionId::new();
        assert_ne!(first, second);
    }

    #[test]
    fn uuid_round_trip() {
        let id = SubscriptionId::new();
        let raw: Uuid = id.into();
        assert_eq!(SubscriptionId::from(raw), id);
        assert_eq!(id.to_string(), raw.to_string());
    }
}
