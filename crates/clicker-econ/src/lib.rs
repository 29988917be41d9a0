#![deny(warnings)]

//! Economy engine for Retro Clicker.
//!
//! This crate provides:
//! - The exponential upgrade cost curve
//! - A tick-driven production/purchase state machine (`Economy`)
//! - Achievement evaluation over economy snapshots
//! - `PlayerState`, which combines both and counts local mutations

use clicker_core::{
    find_upgrade, production_rate_of, Inventory, Progress, UpgradeId, ValidationError,
};
use thiserror::Error;

pub mod achievements;
pub mod player;

pub use achievements::{AchievementTracker, AchievementUnlocked};
pub use player::{PlayerSnapshot, PlayerState};

/// Each successive unit of the same upgrade costs this much more than the last.
pub const GROWTH_FACTOR: f64 = 1.15;

/// Default score gained by one manual click.
pub const CLICK_GAIN: f64 = 1.0;

/// Errors produced by economy operations.
#[derive(Debug, Error, PartialEq)]
pub enum EconError {
    /// Upgrade id is not in the catalog.
    #[error("unknown upgrade: {0}")]
    UnknownUpgrade(String),
    /// Score does not cover the next unit. Expected in normal play.
    #[error("cannot afford upgrade: costs {cost}, have {score}")]
    Unaffordable { cost: f64, score: f64 },
    /// Gains must be finite and non-negative.
    #[error("invalid amount: {0}")]
    InvalidAmount(f64),
    /// A stored record cannot be adopted as local state.
    #[error("invalid stored record: {0}")]
    InvalidRecord(#[from] ValidationError),
}

/// Cost of the next unit given how many are already owned.
///
/// cost(n) = floor(base * 1.15^n). Rounding and growth are part of the save
/// format: scores are compared across clients.
///
/// Example:
/// assert_eq!(upgrade_cost(15.0, 0), 15.0);
/// assert_eq!(upgrade_cost(15.0, 1), 17.0);
pub fn upgrade_cost(base_cost: f64, owned: u64) -> f64 {
    (base_cost * GROWTH_FACTOR.powf(owned as f64)).floor()
}

/// Receipt for a successful purchase.
#[derive(Clone, Debug, PartialEq)]
pub struct Purchase {
    pub upgrade: UpgradeId,
    /// Amount debited.
    pub cost: f64,
    /// Units owned after the purchase.
    pub owned: u64,
}

/// Local score, production rate and owned upgrades.
///
/// Invariants: `score >= 0`, `production_rate == production_rate_of(inventory)`,
/// inventory counts never decrease.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Economy {
    score: f64,
    production_rate: f64,
    inventory: Inventory,
}

impl Economy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from stored parts. The rate is always derived from the inventory.
    pub fn from_parts(score: f64, inventory: Inventory) -> Result<Self, EconError> {
        if !score.is_finite() || score < 0.0 {
            return Err(EconError::InvalidAmount(score));
        }
        let production_rate = production_rate_of(&inventory);
        Ok(Self {
            score,
            production_rate,
            inventory,
        })
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn production_rate(&self) -> f64 {
        self.production_rate
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Units owned of `id`, zero when never bought.
    pub fn owned(&self, id: &str) -> u64 {
        self.inventory
            .get(&UpgradeId::new(id))
            .copied()
            .unwrap_or(0)
    }

    /// View used by achievement conditions.
    pub fn progress(&self) -> Progress<'_> {
        Progress {
            score: self.score,
            production_rate: self.production_rate,
            inventory: &self.inventory,
        }
    }

    /// Advance one tick. Returns whether the score changed.
    ///
    /// Missed ticks are not replayed; callers simply stop calling this while suspended.
    pub fn tick(&mut self) -> bool {
        if self.production_rate <= 0.0 {
            return false;
        }
        self.score += self.production_rate;
        true
    }

    /// Player-initiated gain, e.g. one click.
    pub fn manual_gain(&mut self, amount: f64) -> Result<(), EconError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(EconError::InvalidAmount(amount));
        }
        self.score += amount;
        Ok(())
    }

    /// Price of the next unit of `id`.
    pub fn cost_of_next(&self, id: &str) -> Result<f64, EconError> {
        let def = find_upgrade(id).ok_or_else(|| EconError::UnknownUpgrade(id.to_string()))?;
        Ok(upgrade_cost(def.base_cost, self.owned(id)))
    }

    pub fn can_afford(&self, id: &str) -> bool {
        self.cost_of_next(id)
            .map(|cost| self.score >= cost)
            .unwrap_or(false)
    }

    /// Buy one unit of `id`. Leaves state untouched unless it succeeds.
    pub fn purchase(&mut self, id: &str) -> Result<Purchase, EconError> {
        let def = find_upgrade(id).ok_or_else(|| EconError::UnknownUpgrade(id.to_string()))?;
        let owned = self.owned(id);
        let cost = upgrade_cost(def.base_cost, owned);
        if self.score < cost {
            return Err(EconError::Unaffordable {
                cost,
                score: self.score,
            });
        }
        self.score -= cost;
        let count = self.inventory.entry(def.upgrade_id()).or_insert(0);
        *count += 1;
        self.production_rate += def.yield_per_unit;
        Ok(Purchase {
            upgrade: def.upgrade_id(),
            cost,
            owned: *count,
        })
    }
}
