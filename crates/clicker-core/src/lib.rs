#![deny(warnings)]

//! Core domain models for Retro Clicker.
//!
//! This crate defines the identifiers, static catalogs, per-player records and
//! the document shapes persisted in the shared store, with validation helpers
//! to guarantee basic invariants.

use chrono::{DateTime, TimeZone, Utc};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Opaque, stable identifier assigned by the identity provider.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upgrade identifier, e.g. "cursor", "modem".
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpgradeId(pub String);

impl UpgradeId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Achievement identifier, e.g. "hello_world".
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AchievementId(pub String);

impl AchievementId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Owned count per upgrade.
pub type Inventory = BTreeMap<UpgradeId, u64>;

/// Timestamp assigned by the store on write. Monotonic per store.
///
/// Written as RFC 3339. Reads also accept `{seconds, nanoseconds}` objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ServerTimestamp(pub DateTime<Utc>);

#[derive(Deserialize)]
#[serde(untagged)]
enum TimestampRepr {
    Rfc3339(DateTime<Utc>),
    Parts {
        seconds: i64,
        #[serde(default)]
        nanoseconds: u32,
    },
}

impl<'de> Deserialize<'de> for ServerTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match TimestampRepr::deserialize(deserializer)? {
            TimestampRepr::Rfc3339(at) => Ok(Self(at)),
            TimestampRepr::Parts {
                seconds,
                nanoseconds,
            } => Utc
                .timestamp_opt(seconds, nanoseconds)
                .single()
                .map(Self)
                .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {seconds}s"))),
        }
    }
}

/// Longest accepted display name, in characters.
pub const MAX_DISPLAY_NAME_CHARS: usize = 12;

/// A validated, trimmed display name of 1..=12 characters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DisplayName(String);

impl DisplayName {
    /// Trim and validate a user-entered name.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyDisplayName);
        }
        let len = name.chars().count();
        if len > MAX_DISPLAY_NAME_CHARS {
            return Err(ValidationError::DisplayNameTooLong {
                len,
                max: MAX_DISPLAY_NAME_CHARS,
            });
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DisplayName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DisplayName> for String {
    fn from(value: DisplayName) -> Self {
        value.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A purchasable rate upgrade. Static for the process lifetime.
#[derive(Clone, Debug, PartialEq)]
pub struct UpgradeDefinition {
    pub id: &'static str,
    /// Display label.
    pub name: &'static str,
    /// Production added per owned unit, per tick.
    pub yield_per_unit: f64,
    /// Cost of the first unit.
    pub base_cost: f64,
}

impl UpgradeDefinition {
    pub fn upgrade_id(&self) -> UpgradeId {
        UpgradeId::new(self.id)
    }
}

/// Upgrade catalog in display order.
pub const UPGRADES: &[UpgradeDefinition] = &[
    UpgradeDefinition {
        id: "cursor",
        name: "Auto-Clicker",
        yield_per_unit: 1.0,
        base_cost: 15.0,
    },
    UpgradeDefinition {
        id: "floppy",
        name: "Floppy Disk",
        yield_per_unit: 5.0,
        base_cost: 100.0,
    },
    UpgradeDefinition {
        id: "modem",
        name: "56k Modem",
        yield_per_unit: 20.0,
        base_cost: 500.0,
    },
    UpgradeDefinition {
        id: "crt",
        name: "CRT Monitor",
        yield_per_unit: 50.0,
        base_cost: 2_000.0,
    },
    UpgradeDefinition {
        id: "server",
        name: "Mainframe",
        yield_per_unit: 150.0,
        base_cost: 10_000.0,
    },
    UpgradeDefinition {
        id: "ai",
        name: "AI Core",
        yield_per_unit: 500.0,
        base_cost: 50_000.0,
    },
    UpgradeDefinition {
        id: "quantum",
        name: "Quantum Svr",
        yield_per_unit: 1_500.0,
        base_cost: 250_000.0,
    },
    UpgradeDefinition {
        id: "botnet",
        name: "Global Botnet",
        yield_per_unit: 5_000.0,
        base_cost: 1_000_000.0,
    },
];

/// Look up an upgrade by id.
pub fn find_upgrade(id: &str) -> Option<&'static UpgradeDefinition> {
    UPGRADES.iter().find(|u| u.id == id)
}

/// Production rate implied by an inventory. Ids missing from the catalog yield nothing.
pub fn production_rate_of(inventory: &Inventory) -> f64 {
    inventory
        .iter()
        .filter_map(|(id, &count)| {
            find_upgrade(id.as_str()).map(|u| count as f64 * u.yield_per_unit)
        })
        .sum()
}

/// The observable economy fields achievement conditions are evaluated against.
#[derive(Clone, Copy, Debug)]
pub struct Progress<'a> {
    pub score: f64,
    pub production_rate: f64,
    pub inventory: &'a Inventory,
}

impl Progress<'_> {
    /// Owned count of an upgrade, zero when absent.
    pub fn owned(&self, id: &str) -> u64 {
        self.inventory
            .get(&UpgradeId::new(id))
            .copied()
            .unwrap_or(0)
    }
}

/// Static description of a single achievement.
#[derive(Clone)]
pub struct AchievementDefinition {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// Pure predicate over the current economy.
    pub condition: fn(&Progress<'_>) -> bool,
}

impl fmt::Debug for AchievementDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AchievementDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl AchievementDefinition {
    pub fn achievement_id(&self) -> AchievementId {
        AchievementId::new(self.id)
    }
}

/// Achievement catalog. Evaluation follows declaration order.
pub const ACHIEVEMENTS: &[AchievementDefinition] = &[
    AchievementDefinition {
        id: "hello_world",
        name: "Hello World",
        description: "Click 1 time",
        condition: |p| p.score >= 1.0,
    },
    AchievementDefinition {
        id: "script_kiddie",
        name: "Script Kiddie",
        description: "Reach 1,000 Bytes",
        condition: |p| p.score >= 1_000.0,
    },
    AchievementDefinition {
        id: "hacker",
        name: "Hacker",
        description: "Reach 100 CPS",
        condition: |p| p.production_rate >= 100.0,
    },
    AchievementDefinition {
        id: "sysadmin",
        name: "Sysadmin",
        description: "Own a Mainframe",
        condition: |p| p.owned("server") >= 1,
    },
    AchievementDefinition {
        id: "singularity",
        name: "Singularity",
        description: "Reach 1M Bytes",
        condition: |p| p.score >= 1_000_000.0,
    },
    AchievementDefinition {
        id: "overlord",
        name: "Net Overlord",
        description: "Reach 5,000 CPS",
        condition: |p| p.production_rate >= 5_000.0,
    },
];

/// One player's synchronized state, the unit of synchronization.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub display_name: String,
    pub score: f64,
    pub production_rate: f64,
    pub inventory: Inventory,
    /// Unlock order is preserved.
    pub unlocked_achievements: Vec<AchievementId>,
    pub last_updated: Option<ServerTimestamp>,
}

impl PlayerRecord {
    /// Build a record from a stored document keyed by `id`.
    pub fn from_document(id: PlayerId, doc: PlayerDocument) -> Self {
        let display_name = doc.name().to_string();
        Self {
            id,
            display_name,
            score: doc.score,
            production_rate: doc.cps,
            inventory: doc.inventory,
            unlocked_achievements: doc.trophies,
            last_updated: doc.last_updated,
        }
    }

    /// Document shape written to the store. `lastUpdated` is left to the server.
    pub fn to_document(&self) -> PlayerDocument {
        PlayerDocument {
            display_name: Some(self.display_name.clone()),
            username: None,
            score: self.score,
            cps: self.production_rate,
            inventory: self.inventory.clone(),
            trophies: self.unlocked_achievements.clone(),
            last_updated: None,
        }
    }
}

/// Persisted shape of a player document.
///
/// Decoding never fails on a single field: a value of the wrong shape falls
/// back to the field default, and bad inventory or trophy entries are dropped.
/// The exception is a `score` that is present but not a number, which decodes
/// as NaN so `validate_record` can refuse it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDocument {
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub display_name: Option<String>,
    /// Older clients stored the name here.
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "score_or_nan")]
    pub score: f64,
    #[serde(default, deserialize_with = "lenient")]
    pub cps: f64,
    #[serde(default, deserialize_with = "lenient_inventory")]
    pub inventory: Inventory,
    #[serde(default, deserialize_with = "lenient_entries")]
    pub trophies: Vec<AchievementId>,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_updated: Option<ServerTimestamp>,
}

/// Field value, or its default when the stored value has another shape.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

fn score_or_nan<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => 0.0,
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        _ => f64::NAN,
    })
}

fn lenient_inventory<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Inventory, D::Error> {
    let entries = match Value::deserialize(deserializer)? {
        Value::Object(entries) => entries,
        _ => return Ok(Inventory::new()),
    };
    Ok(entries
        .into_iter()
        .filter_map(|(id, count)| count.as_u64().map(|n| (UpgradeId(id), n)))
        .collect())
}

fn lenient_entries<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| T::deserialize(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

impl PlayerDocument {
    /// Display name, preferring the current field over the legacy one.
    pub fn name(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or("")
    }
}

/// An append-only chat entry as seen by readers.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatMessage {
    /// Store-assigned document id.
    pub id: String,
    pub author_id: Option<PlayerId>,
    pub author_name: String,
    pub text: String,
    /// `None` until the server timestamp resolves.
    pub timestamp: Option<ServerTimestamp>,
    /// Store-assigned insertion sequence, used to break timestamp ties.
    pub seq: u64,
}

/// Persisted shape of a chat document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDocument {
    #[serde(default, deserialize_with = "lenient")]
    pub username: String,
    #[serde(default, deserialize_with = "lenient")]
    pub text: String,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub author_id: Option<PlayerId>,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<ServerTimestamp>,
}

impl ChatMessage {
    pub fn from_document(id: String, seq: u64, doc: ChatDocument) -> Self {
        Self {
            id,
            author_id: doc.author_id,
            author_name: doc.username,
            text: doc.text,
            timestamp: doc.timestamp,
            seq,
        }
    }
}

/// Validation errors for domain invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Display name is blank after trimming.
    #[error("display name must not be empty")]
    EmptyDisplayName,
    /// Display name exceeds the allowed length.
    #[error("display name has {len} characters, at most {max} allowed")]
    DisplayNameTooLong { len: usize, max: usize },
    /// Chat text is blank after trimming.
    #[error("chat message must not be empty")]
    EmptyChatText,
    /// Score must be a finite number.
    #[error("non-finite numeric value encountered")]
    NonFinite,
    /// Score must be non-negative.
    #[error("negative amount is invalid")]
    NegativeAmount,
}

/// Trim chat input and reject blank messages.
pub fn validate_chat_text(raw: &str) -> Result<String, ValidationError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ValidationError::EmptyChatText);
    }
    Ok(text.to_string())
}

/// Check that a stored score can be adopted as local state.
///
/// The stored rate is not checked; restoring re-derives it from the inventory.
pub fn validate_record(record: &PlayerRecord) -> Result<(), ValidationError> {
    if !record.score.is_finite() {
        return Err(ValidationError::NonFinite);
    }
    if record.score < 0.0 {
        return Err(ValidationError::NegativeAmount);
    }
    Ok(())
}

/// Compact display formatting: `1.50M`, `2.5k`, `42`.
pub fn format_amount(n: f64) -> String {
    if n >= 1_000_000.0 {
        format!("{:.2}M", n / 1_000_000.0)
    } else if n >= 1_000.0 {
        format!("{:.1}k", n / 1_000.0)
    } else {
        format!("{}", n.max(0.0).floor() as u64)
    }
}
