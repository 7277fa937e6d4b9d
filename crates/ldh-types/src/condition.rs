//! Dependency conditions gating a deferred event.

use serde::{Deserialize, Serialize};

use crate::enums::View;
use crate::key::ResourceKey;

/// One existence or absence predicate that must hold before an event fires.
///
/// `target` is the resource checked by point reads. `pattern` is the
/// broader key under which a wildcard subscription can be shared with
/// other waiters; `target` must be a member of `pattern`. When the two are
/// equal the condition does not share a subscription with other targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyCondition {
    /// The specific resource to check.
    pub target: ResourceKey,
    /// The subscription pattern covering `target`.
    pub pattern: ResourceKey,
    /// `true` to wait for the target to exist, `false` to wait for its absence.
    pub expect_present: bool,
    /// Store partition the target is checked in.
    pub view: View,
}

impl DependencyCondition {
    /// Wait until `target` exists in `view`.
    ///
    /// The pattern defaults to the target itself; see [`Self::with_pattern`].
    pub fn present(target: impl Into<ResourceKey>, view: View) -> Self {
        let target = target.into();
        Self {
            pattern: target.clone(),
            target,
            expect_present: true,
            view,
        }
    }

    /// Wait until `target` no longer exists in `view`.
    pub fn absent(target: impl Into<ResourceKey>, view: View) -> Self {
        let target = target.into();
        Self {
            pattern: target.clone(),
            target,
            expect_present: false,
            view,
        }
    }

    /// Share the subscription under `pattern`.
    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<ResourceKey>) -> Self {
        self.pattern = pattern.into();
        self
    }

    /// Whether the subscription pattern is broader than the target.
    pub fn is_shared(&self) -> bool {
        self.pattern != self.target
    }

    /// Whether a read that found the target (or not) satisfies this condition.
    pub const fn is_satisfied_by(&self, exists: bool) -> bool {
        exists == self.expect_present
    }
}

impl core::fmt::Display for DependencyCondition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let polarity = if self.expect_present { "present" } else { "absent" };
        write!(f, "{}:{} {polarity}", self.view, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pattern_is_target() {
        let cond = DependencyCondition::present("/vpn/blue", View::Desired);
        assert_eq!(cond.pattern, cond.target);
        assert!(!cond.is_shared());
        let shared = cond.with_pattern("/vpn/*");
        assert!(shared.is_shared());
        assert!(shared.target.matches(&shared.pattern));
    }

    #[test]
    fn satisfaction_follows_polarity() {
        let present = DependencyCondition::present("/a", View::Observed);
        let absent = DependencyCondition::absent("/a", View::Observed);
        assert!(present.is_satisfied_by(true));
        assert!(!present.is_satisfied_by(false));
        assert!(absent.is_satisfied_by(false));
        assert!(!absent.is_satisfied_by(true));
        assert_eq!(absent.to_string(), "observed:/a absent");
    }
}
