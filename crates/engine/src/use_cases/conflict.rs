//! Merging two divergent snapshots of the same session.
//!
//! The newer snapshot (by `lastModified`, falling back to its checkpoint
//! time) is primary: its current scene wins, and the older snapshot only
//! contributes history entries and a checkpoint the primary lacks. When the
//! two cannot be merged, the newer one is returned as-is.

use std::collections::HashSet;
use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use storyloom_domain::{
    compare_recency, compare_timestamps, parse_timestamp, Checkpoint, GameHistoryEntry, GameState,
    VersionedState,
};

/// A state plus the time it was last written, if known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: GameState,
    pub last_modified: Option<String>,
}

impl SessionSnapshot {
    pub fn new(state: GameState, last_modified: Option<String>) -> Self {
        Self {
            state,
            last_modified,
        }
    }

    /// `lastModified` if it parses, else the checkpoint time, else unknown.
    pub fn recency(&self) -> Option<DateTime<Utc>> {
        self.last_modified
            .as_deref()
            .and_then(parse_timestamp)
            .or_else(|| {
                self.state
                    .checkpoint
                    .as_ref()
                    .and_then(|c| parse_timestamp(&c.timestamp))
            })
    }
}

impl From<VersionedState> for SessionSnapshot {
    fn from(record: VersionedState) -> Self {
        Self::new(record.state, Some(record.last_modified))
    }
}

impl From<GameState> for SessionSnapshot {
    fn from(state: GameState) -> Self {
        Self::new(state, None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("Snapshots belong to different sessions ({primary} vs {secondary})")]
    SessionMismatch { primary: String, secondary: String },
}

/// Merge two snapshots into one state. Never fails: when merging is not
/// possible the newer snapshot wins unmerged. On equal recency `a` is primary.
pub fn resolve(a: &SessionSnapshot, b: &SessionSnapshot) -> GameState {
    let (primary, secondary) = match compare_recency(a.recency(), b.recency()) {
        Ordering::Less => (b, a),
        Ordering::Equal | Ordering::Greater => (a, b),
    };

    match merge(&primary.state, &secondary.state) {
        Ok(merged) => {
            tracing::debug!(
                primary_history = primary.state.history.len(),
                secondary_history = secondary.state.history.len(),
                merged_history = merged.history.len(),
                "Merged session snapshots"
            );
            merged
        }
        Err(e) => {
            tracing::warn!(error = %e, "Snapshot merge failed, keeping newer snapshot");
            primary.state.clone()
        }
    }
}

fn merge(primary: &GameState, secondary: &GameState) -> Result<GameState, MergeError> {
    if let (Some(p), Some(s)) = (&primary.session_id, &secondary.session_id) {
        if p != s {
            return Err(MergeError::SessionMismatch {
                primary: p.clone(),
                secondary: s.clone(),
            });
        }
    }

    let mut merged = primary.clone();
    merged.history = merge_history(&primary.history, &secondary.history);
    merged.checkpoint = merge_checkpoint(primary.checkpoint.as_ref(), secondary.checkpoint.as_ref());
    if merged.session_id.is_none() {
        merged.session_id = secondary.session_id.clone();
    }
    Ok(merged)
}

/// Primary entries first, then secondary entries with an unseen
/// `(sceneId, choice)`. Entries with a readable timestamp are then put in
/// time order among themselves; the others keep their positions.
fn merge_history(primary: &[GameHistoryEntry], secondary: &[GameHistoryEntry]) -> Vec<GameHistoryEntry> {
    let mut seen = HashSet::new();
    let mut merged: Vec<GameHistoryEntry> = primary
        .iter()
        .chain(secondary)
        .filter(|entry| seen.insert(entry.identity()))
        .cloned()
        .collect();

    let timed_slots: Vec<usize> = merged
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.timestamp.as_deref().and_then(parse_timestamp).is_some())
        .map(|(idx, _)| idx)
        .collect();

    let mut timed: Vec<GameHistoryEntry> = timed_slots.iter().map(|&idx| merged[idx].clone()).collect();
    // Stable, so equal times keep merge order
    timed.sort_by(|x, y| compare_timestamps(x.timestamp.as_deref(), y.timestamp.as_deref()));

    for (slot, entry) in timed_slots.into_iter().zip(timed) {
        merged[slot] = entry;
    }
    merged
}

/// The later checkpoint wins; a lone checkpoint is kept.
fn merge_checkpoint(primary: Option<&Checkpoint>, secondary: Option<&Checkpoint>) -> Option<Checkpoint> {
    match (primary, secondary) {
        (Some(p), Some(s)) => {
            match compare_timestamps(Some(&s.timestamp), Some(&p.timestamp)) {
                Ordering::Greater => Some(s.clone()),
                Ordering::Equal | Ordering::Less => Some(p.clone()),
            }
        }
        (Some(only), None) | (None, Some(only)) => Some(only.clone()),
        (None, None) => None,
    }
}
