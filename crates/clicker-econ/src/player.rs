//! Per-client game state: economy plus achievements, with a mutation counter.

use crate::achievements::{AchievementTracker, AchievementUnlocked};
use crate::{EconError, Economy, Purchase};
use clicker_core::{
    production_rate_of, validate_record, AchievementId, Inventory, PlayerId, PlayerRecord,
};
use tracing::warn;

/// Consistent copy of the state taken between mutations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlayerSnapshot {
    pub score: f64,
    pub production_rate: f64,
    pub inventory: Inventory,
    pub unlocked_achievements: Vec<AchievementId>,
    /// Bumped by every local mutation.
    pub revision: u64,
}

impl PlayerSnapshot {
    pub fn to_record(&self, id: PlayerId, display_name: &str) -> PlayerRecord {
        PlayerRecord {
            id,
            display_name: display_name.to_string(),
            score: self.score,
            production_rate: self.production_rate,
            inventory: self.inventory.clone(),
            unlocked_achievements: self.unlocked_achievements.clone(),
            last_updated: None,
        }
    }
}

/// Single-writer state for one client.
#[derive(Clone, Debug, Default)]
pub struct PlayerState {
    economy: Economy,
    achievements: AchievementTracker,
    revision: u64,
}

impl PlayerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt a stored record as the starting state.
    ///
    /// The production rate is re-derived from the inventory; a stored rate that
    /// disagrees is replaced. Records with a negative or unreadable score are
    /// refused rather than reset.
    pub fn restore(record: &PlayerRecord) -> Result<Self, EconError> {
        validate_record(record)?;
        let derived = production_rate_of(&record.inventory);
        if derived != record.production_rate {
            warn!(
                player = %record.id,
                stored = record.production_rate,
                derived,
                "stored production rate disagrees with inventory; using derived rate"
            );
        }
        Ok(Self {
            economy: Economy::from_parts(record.score, record.inventory.clone())?,
            achievements: AchievementTracker::restore(&record.unlocked_achievements),
            revision: 0,
        })
    }

    pub fn economy(&self) -> &Economy {
        &self.economy
    }

    pub fn achievements(&self) -> &AchievementTracker {
        &self.achievements
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Record a change that is not an economy mutation, e.g. joining.
    pub fn touch(&mut self) {
        self.revision += 1;
    }

    /// One tick of production, then achievement evaluation.
    pub fn tick(&mut self) -> Vec<AchievementUnlocked> {
        let produced = self.economy.tick();
        self.finish(produced)
    }

    /// Manual gain, then achievement evaluation.
    pub fn click(&mut self, gain: f64) -> Result<Vec<AchievementUnlocked>, EconError> {
        self.economy.manual_gain(gain)?;
        Ok(self.finish(true))
    }

    /// Purchase, then achievement evaluation. Rejected purchases change nothing.
    pub fn purchase(
        &mut self,
        id: &str,
    ) -> Result<(Purchase, Vec<AchievementUnlocked>), EconError> {
        let receipt = self.economy.purchase(id)?;
        Ok((receipt, self.finish(true)))
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            score: self.economy.score(),
            production_rate: self.economy.production_rate(),
            inventory: self.economy.inventory().clone(),
            unlocked_achievements: self.achievements.unlocked().to_vec(),
            revision: self.revision,
        }
    }

    fn finish(&mut self, changed: bool) -> Vec<AchievementUnlocked> {
        let fired = self.achievements.evaluate(&self.economy.progress());
        if changed || !fired.is_empty() {
            self.revision += 1;
        }
        fired
    }
}
