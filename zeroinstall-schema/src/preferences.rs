//! Per-feed, per-interface and per-implementation user overrides
//! (spec.md §3). These are loaded on demand from the config area,
//! mutated through the accessors below, and saved atomically by the
//! engine's config module — this crate only defines their shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::arch::Stability;
use crate::uri::FeedUri;

/// User overrides scoped to one implementation of one feed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationPreferences {
    /// User-forced stability, overriding whatever the feed declares.
    /// `Some(Buggy)` or `Some(Insecure)` hard-excludes the implementation
    /// from solving (spec.md §4.7 step 4).
    pub user_stability: Option<Stability>,
}

/// User overrides scoped to one feed document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPreferences {
    /// Seconds since the Unix epoch when this feed was last successfully
    /// refreshed, consulted against `Config.freshness` (spec.md §4.7).
    pub last_checked: Option<i64>,
    /// Per-implementation overrides, keyed by implementation `id`.
    pub implementations: BTreeMap<String, ImplementationPreferences>,
}

impl FeedPreferences {
    /// Drop implementation entries that hold no actual override, so the
    /// on-disk form doesn't accumulate stale noise (spec.md §3
    /// "normalized to drop superfluous entries").
    pub fn normalize(&mut self) {
        self.implementations
            .retain(|_, prefs| prefs.user_stability.is_some());
    }
}

/// User overrides scoped to one interface (a logical program identity,
/// not any single feed of it).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfacePreferences {
    /// Additional feeds to consult for this interface, beyond the
    /// primary feed's own `<feed src=>` links (spec.md §4.7 step 2).
    pub extra_feeds: Vec<FeedUri>,
    /// Rollout percentage dice-roll seed/value for staged releases
    /// (spec.md §4.7 step 5, "lower rollout-percentage dice roll").
    pub rollout_percentage: Option<u8>,
    /// Stability policy override: the minimum stability candidates must
    /// meet to be `preferred` (spec.md §4.7 step 5). `None` means use the
    /// global default (`Stable`, or `Testing` under `HelpWithTesting`).
    pub stability_policy: Option<Stability>,
}

impl InterfacePreferences {
    /// Register an additional feed, ignoring duplicates.
    pub fn add_feed(&mut self, feed: FeedUri) {
        if !self.extra_feeds.contains(&feed) {
            self.extra_feeds.push(feed);
        }
    }

    /// Remove an additional feed. Returns `true` if it was present.
    pub fn remove_feed(&mut self, feed: &FeedUri) -> bool {
        let before = self.extra_feeds.len();
        self.extra_feeds.retain(|f| f != feed);
        self.extra_feeds.len() != before
    }

    /// True if there is nothing here worth persisting.
    pub fn is_empty(&self) -> bool {
        self.extra_feeds.is_empty()
            && self.rollout_percentage.is_none()
            && self.stability_policy.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_empty_implementation_entries() {
        let mut prefs = FeedPreferences::default();
        prefs
            .implementations
            .insert("sha256new_a".into(), ImplementationPreferences::default());
        prefs.implementations.insert(
            "sha256new_b".into(),
            ImplementationPreferences {
                user_stability: Some(Stability::Buggy),
            },
        );
        prefs.normalize();
        assert_eq!(prefs.implementations.len(), 1);
        assert!(prefs.implementations.contains_key("sha256new_b"));
    }

    #[test]
    fn add_feed_is_idempotent() {
        let mut prefs = InterfacePreferences::default();
        let feed = FeedUri::new("https://example.com/extra.xml".into());
        prefs.add_feed(feed.clone());
        prefs.add_feed(feed.clone());
        assert_eq!(prefs.extra_feeds.len(), 1);
        assert!(prefs.remove_feed(&feed));
        assert!(prefs.is_empty());
    }
}
