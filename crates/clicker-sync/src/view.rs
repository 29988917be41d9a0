//! Shared views derived from realtime snapshots.
//!
//! Both derivations are pure and recomputed in full for every snapshot.

use clicker_core::{ChatDocument, ChatMessage, PlayerDocument, PlayerId};
use clicker_store::CollectionSnapshot;
use tracing::warn;

/// Default number of chat messages kept in view.
pub const DEFAULT_CHAT_WINDOW: usize = 50;

#[derive(Clone, Debug, PartialEq)]
pub struct LeaderboardEntry {
    /// 1-based position.
    pub rank: usize,
    pub id: PlayerId,
    pub display_name: String,
    pub score: f64,
    pub production_rate: f64,
    pub achievements: usize,
}

/// Players ranked by score, plus the sum of every score.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LeaderboardView {
    pub entries: Vec<LeaderboardEntry>,
    pub total_score: f64,
}

impl LeaderboardView {
    pub fn entry(&self, id: &PlayerId) -> Option<&LeaderboardEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    pub fn top(&self, n: usize) -> &[LeaderboardEntry] {
        &self.entries[..n.min(self.entries.len())]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// Rank every player in `snapshot` by descending score.
///
/// Ties keep snapshot order. Fields of the wrong shape count as zero.
pub fn build_leaderboard(snapshot: &CollectionSnapshot) -> LeaderboardView {
    let mut entries: Vec<LeaderboardEntry> = snapshot
        .documents
        .iter()
        .filter_map(|doc| match doc.decode::<PlayerDocument>() {
            Ok(data) => Some(LeaderboardEntry {
                rank: 0,
                id: PlayerId(doc.id.clone()),
                display_name: data.name().to_string(),
                score: finite_or_zero(data.score),
                production_rate: finite_or_zero(data.cps),
                achievements: data.trophies.len(),
            }),
            Err(e) => {
                warn!(id = %doc.id, error = %e, "skipping undecodable player document");
                None
            }
        })
        .collect();
    entries.sort_by(|a, b| b.score.total_cmp(&a.score));
    for (i, e) in entries.iter_mut().enumerate() {
        e.rank = i + 1;
    }
    let total_score = entries.iter().map(|e| e.score).sum();
    LeaderboardView {
        entries,
        total_score,
    }
}

/// Most recent chat messages in ascending time order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatWindow {
    pub messages: Vec<ChatMessage>,
}

impl ChatWindow {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn latest(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}

/// Keep the `limit` most recent messages of `snapshot`, oldest first.
///
/// Messages whose server timestamp has not resolved yet are the newest by
/// construction; they sort after every stamped message, in arrival order.
pub fn build_chat_window(snapshot: &CollectionSnapshot, limit: usize) -> ChatWindow {
    let mut messages: Vec<ChatMessage> = snapshot
        .documents
        .iter()
        .filter_map(|doc| match doc.decode::<ChatDocument>() {
            Ok(data) => Some(ChatMessage::from_document(doc.id.clone(), doc.seq, data)),
            Err(e) => {
                warn!(id = %doc.id, error = %e, "skipping undecodable chat document");
                None
            }
        })
        .collect();
    messages.sort_by_key(|m| (m.timestamp.is_none(), m.timestamp, m.seq));
    let excess = messages.len().saturating_sub(limit);
    messages.drain(..excess);
    ChatWindow { messages }
}
