//! Debounced write-back of local state and join-time reconciliation.
//!
//! Local mutations bump the player revision. A flush writes the full record
//! whenever the latest revision has not been acknowledged by the store, and
//! only a successful write advances the acknowledged revision. Failed writes
//! leave the state dirty, so the next flush retries with whatever is current
//! by then (at-least-once, last writer wins).

use chrono::{DateTime, Utc};
use clicker_core::{DisplayName, PlayerDocument, PlayerId, PlayerRecord};
use clicker_econ::{EconError, PlayerSnapshot, PlayerState};
use clicker_store::{CollectionPaths, CollectionSnapshot, Patch, RemoteStore, StoreError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Field the store stamps on every player write.
pub const LAST_UPDATED_FIELD: &str = "lastUpdated";

/// Result of one flush attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing changed since the last successful write.
    Clean,
    /// The record at `revision` was stored.
    Written { revision: u64 },
    /// The write failed; the state stays dirty.
    Failed,
}

/// Observable write-back health.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncStatus {
    /// Revision acknowledged by the last successful write.
    pub flushed_revision: u64,
    /// Wall-clock time of the last successful write.
    pub last_flushed_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub total_writes: u64,
    pub last_error: Option<String>,
}

impl SyncStatus {
    /// Whether a state at `revision` still needs writing.
    pub fn is_dirty_at(&self, revision: u64) -> bool {
        revision > self.flushed_revision
    }
}

/// Owns the write path for one player's record.
pub struct SyncCoordinator<S> {
    store: Arc<S>,
    collection: String,
    player_id: PlayerId,
    display_name: DisplayName,
    status: SyncStatus,
}

impl<S: RemoteStore> SyncCoordinator<S> {
    pub fn new(
        store: Arc<S>,
        paths: &CollectionPaths,
        player_id: PlayerId,
        display_name: DisplayName,
    ) -> Self {
        Self {
            store,
            collection: paths.players.clone(),
            player_id,
            display_name,
            status: SyncStatus::default(),
        }
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    pub fn is_dirty(&self, snapshot: &PlayerSnapshot) -> bool {
        self.status.is_dirty_at(snapshot.revision)
    }

    /// Record as it would be written for `snapshot`.
    pub fn record_for(&self, snapshot: &PlayerSnapshot) -> PlayerRecord {
        snapshot.to_record(self.player_id.clone(), self.display_name.as_str())
    }

    /// Write `snapshot` if it carries unacknowledged changes.
    pub async fn flush(&mut self, snapshot: &PlayerSnapshot) -> FlushOutcome {
        if !self.is_dirty(snapshot) {
            return FlushOutcome::Clean;
        }
        match self.write(snapshot).await {
            Ok(()) => {
                self.status.flushed_revision = snapshot.revision;
                self.status.last_flushed_at = Some(Utc::now());
                self.status.consecutive_failures = 0;
                self.status.total_writes += 1;
                self.status.last_error = None;
                debug!(
                    player = %self.player_id,
                    revision = snapshot.revision,
                    score = snapshot.score,
                    "flushed player record"
                );
                FlushOutcome::Written {
                    revision: snapshot.revision,
                }
            }
            Err(e) => {
                self.status.consecutive_failures += 1;
                self.status.last_error = Some(e.to_string());
                warn!(
                    player = %self.player_id,
                    failures = self.status.consecutive_failures,
                    error = %e,
                    "flush failed; will retry next interval"
                );
                FlushOutcome::Failed
            }
        }
    }

    async fn write(&self, snapshot: &PlayerSnapshot) -> Result<(), StoreError> {
        let record = self.record_for(snapshot);
        let patch =
            Patch::from_serialize(&record.to_document())?.server_timestamp(LAST_UPDATED_FIELD);
        self.store
            .merge_upsert(&self.collection, self.player_id.as_str(), patch)
            .await
    }
}

/// Stored record for `id` in a players snapshot, if any.
///
/// A document that exists but cannot be decoded is an error, never "absent".
pub fn find_existing(
    snapshot: &CollectionSnapshot,
    id: &PlayerId,
) -> Result<Option<PlayerRecord>, StoreError> {
    let Some(doc) = snapshot.get(id.as_str()) else {
        return Ok(None);
    };
    let data = doc.decode::<PlayerDocument>()?;
    Ok(Some(PlayerRecord::from_document(id.clone(), data)))
}

/// Starting state at join: the stored record wins over fresh defaults.
///
/// A stored record that cannot be adopted is refused, so the caller never
/// flushes fresh defaults over it. The result is marked dirty so the first
/// flush publishes presence.
pub fn reconcile_join(existing: Option<&PlayerRecord>) -> Result<PlayerState, EconError> {
    let mut state = match existing {
        Some(record) => match PlayerState::restore(record) {
            Ok(state) => {
                info!(
                    player = %record.id,
                    score = record.score,
                    "restoring stored progress"
                );
                state
            }
            Err(e) => {
                warn!(player = %record.id, error = %e, "stored record unusable; refusing join");
                return Err(e);
            }
        },
        None => PlayerState::new(),
    };
    state.touch();
    Ok(state)
}
