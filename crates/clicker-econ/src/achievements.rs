//! Achievement evaluation against economy snapshots.

use clicker_core::{AchievementDefinition, AchievementId, Progress, ACHIEVEMENTS};
use tracing::debug;

/// Emitted once per achievement, the first time its condition holds.
#[derive(Clone, Debug, PartialEq)]
pub struct AchievementUnlocked {
    pub id: AchievementId,
    pub name: &'static str,
}

/// Tracks unlocked achievements. The unlocked set only grows.
#[derive(Clone, Debug)]
pub struct AchievementTracker {
    catalog: &'static [AchievementDefinition],
    unlocked: Vec<AchievementId>,
}

impl Default for AchievementTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AchievementTracker {
    pub fn new() -> Self {
        Self::with_catalog(ACHIEVEMENTS)
    }

    pub fn with_catalog(catalog: &'static [AchievementDefinition]) -> Self {
        Self {
            catalog,
            unlocked: Vec::new(),
        }
    }

    /// Seed with previously unlocked ids, dropping duplicates but keeping order.
    ///
    /// Ids unknown to the catalog are kept so that they survive the next write.
    pub fn restore(ids: &[AchievementId]) -> Self {
        let mut tracker = Self::new();
        for id in ids {
            if !tracker.is_unlocked(id) {
                tracker.unlocked.push(id.clone());
            }
        }
        tracker
    }

    pub fn unlocked(&self) -> &[AchievementId] {
        &self.unlocked
    }

    pub fn is_unlocked(&self, id: &AchievementId) -> bool {
        self.unlocked.contains(id)
    }

    /// Check every locked achievement in catalog order; all that now hold fire.
    ///
    /// Conditions are re-evaluated from scratch on every call.
    pub fn evaluate(&mut self, progress: &Progress<'_>) -> Vec<AchievementUnlocked> {
        let mut fired = Vec::new();
        for def in self.catalog {
            let id = def.achievement_id();
            if self.is_unlocked(&id) || !(def.condition)(progress) {
                continue;
            }
            debug!(achievement = def.id, "achievement unlocked");
            self.unlocked.push(id.clone());
            fired.push(AchievementUnlocked { id, name: def.name });
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clicker_core::{Inventory, UpgradeId};
    use proptest::prelude::*;

    fn progress(score: f64, rate: f64, inv: &Inventory) -> Progress<'_> {
        Progress {
            score,
            production_rate: rate,
            inventory: inv,
        }
    }

    #[test]
    fn fires_once_in_catalog_order() {
        let inv = Inventory::new();
        let mut t = AchievementTracker::new();
        let fired = t.evaluate(&progress(2_000.0, 120.0, &inv));
        let ids: Vec<_> = fired.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["hello_world", "script_kiddie", "hacker"]);
        assert_eq!(fired[0].name, "Hello World");

        assert!(t.evaluate(&progress(2_000.0, 120.0, &inv)).is_empty());
        // conditions no longer holding do not revoke
        assert!(t.evaluate(&progress(0.0, 0.0, &inv)).is_empty());
        assert_eq!(t.unlocked().len(), 3);
    }

    #[test]
    fn inventory_condition() {
        let mut inv = Inventory::new();
        inv.insert(UpgradeId::new("server"), 1);
        let mut t = AchievementTracker::new();
        let fired = t.evaluate(&progress(0.0, 150.0, &inv));
        let ids: Vec<_> = fired.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["hacker", "sysadmin"]);
    }

    #[test]
    fn restore_dedupes_and_suppresses_refire() {
        let ids = vec![
            AchievementId::new("hello_world"),
            AchievementId::new("legacy_badge"),
            AchievementId::new("hello_world"),
        ];
        let mut t = AchievementTracker::restore(&ids);
        assert_eq!(t.unlocked().len(), 2);
        let inv = Inventory::new();
        assert!(t.evaluate(&progress(5.0, 0.0, &inv)).is_empty());
    }

    proptest! {
        #[test]
        fn unlocked_set_only_grows(steps in proptest::collection::vec((0.0f64..2e6, 0.0f64..6e3), 1..50)) {
            let inv = Inventory::new();
            let mut t = AchievementTracker::new();
            let mut seen = 0usize;
            for (score, rate) in steps {
                let fired = t.evaluate(&progress(score, rate, &inv));
                prop_assert_eq!(t.unlocked().len(), seen + fired.len());
                seen = t.unlocked().len();
            }
        }
    }
}
