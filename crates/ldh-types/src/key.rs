//! Path-shaped resource keys.
//!
//! Keys look like `/vpn-instances/blue/interfaces/eth0`. A key whose
//! segments include [`WILDCARD_SEGMENT`] is a *pattern*: it names every key
//! with the same number of segments that agrees on all non-wildcard
//! positions. Wildcard subscriptions are shared per pattern.

use serde::{Deserialize, Serialize};

/// Segment value that matches any single segment.
pub const WILDCARD_SEGMENT: &str = "*";

/// Identifier of a keyed resource, or a pattern over such identifiers.
///
/// Keys are compared by value. Leading, trailing and doubled `/`
/// separators carry no meaning for segment matching.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Create a key from its path form.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The path form of the key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key has no segments at all (empty or only separators).
    pub fn is_empty(&self) -> bool {
        self.segments().next().is_none()
    }

    /// Iterate over the non-empty path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.trim().is_empty())
    }

    /// Whether this key is a member of `pattern`.
    ///
    /// A key always matches itself; a pattern matches keys with the same
    /// segment count whose segments equal the pattern's non-wildcard ones.
    pub fn matches(&self, pattern: &Self) -> bool {
        let mut ours = self.segments();
        let mut theirs = pattern.segments();
        loop {
            match (ours.next(), theirs.next()) {
                (None, None) => return true,
                (Some(a), Some(b)) => {
                    if b != WILDCARD_SEGMENT && a != b {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }

    /// The pattern formed by replacing the last segment with a wildcard.
    ///
    /// `/vpn-instances/blue` becomes `/vpn-instances/*`. Returns `None`
    /// for an empty key.
    pub fn wildcard_last(&self) -> Option<Self> {
        let segments: Vec<&str> = self.segments().collect();
        let (_, parents) = segments.split_last()?;
        let mut path = String::new();
        for segment in parents {
            path.push('/');
            path.push_str(segment);
        }
        path.push('/');
        path.push_str(WILDCARD_SEGMENT);
        Some(Self(path))
    }
}

impl core::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for ResourceKey {
    fn from(path: String) -> Self {
        Self(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_keys() {
        assert!(ResourceKey::new("").is_empty());
        assert!(ResourceKey::new("//").is_empty());
        assert!(ResourceKey::new(" / ").is_empty());
        assert!(!ResourceKey::new("/a").is_empty());
    }

    #[test]
    fn exact_match_ignores_separator_noise() {
        let key = ResourceKey::new("/vpn/blue");
        assert!(key.matches(&ResourceKey::new("vpn/blue/")));
        assert!(!key.matches(&ResourceKey::new("/vpn/red")));
    }

    #[test]
    fn wildcard_matches_single_segment_only() {
        let pattern = ResourceKey::new("/vpn/*/interfaces/*");
        assert!(ResourceKey::new("/vpn/blue/interfaces/eth0").matches(&pattern));
        assert!(!ResourceKey::new("/vpn/blue/interfaces").matches(&pattern));
        assert!(!ResourceKey::new("/vpn/blue/routes/eth0").matches(&pattern));
        assert!(!ResourceKey::new("/vpn/blue/interfaces/eth0/extra").matches(&pattern));
    }

    #[test]
    fn wildcard_last_builds_parent_pattern() {
        let key = ResourceKey::new("/vpn-instances/blue");
        assert_eq!(
            key.wildcard_last(),
            Some(ResourceKey::new("/vpn-instances/*"))
        );
        assert!(key.matches(&key.wildcard_last().unwrap_or_else(|| key.clone())));
        assert_eq!(ResourceKey::new("/").wildcard_last(), None);
    }
}
