#![deny(warnings)]

//! Client-side synchronization for Retro Clicker.
//!
//! This crate provides:
//! - Debounced write-back of the local player record (`SyncCoordinator`)
//! - Join-time reconciliation against the stored record
//! - Leaderboard and chat views derived from realtime snapshots
//! - `Session`, which runs the game, flush and feed tasks for one client

use clicker_core::ValidationError;
use clicker_econ::EconError;
use clicker_store::StoreError;
use thiserror::Error;

pub mod config;
pub mod coordinator;
pub mod session;
pub mod view;

pub use config::{ConfigError, SessionConfig};
pub use coordinator::{find_existing, reconcile_join, FlushOutcome, SyncCoordinator, SyncStatus};
pub use session::{Session, TaskKind};
pub use view::{build_chat_window, build_leaderboard, ChatWindow, LeaderboardEntry, LeaderboardView};

/// Errors returned by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Identity provider resolved without an identity.
    #[error("identity not available")]
    NotReady,
    #[error("already joined")]
    AlreadyJoined,
    /// Operation needs a joined session.
    #[error("not joined")]
    NotJoined,
    /// The game loop has stopped.
    #[error("session closed")]
    Closed,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Econ(#[from] EconError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
