//! GameState - the full resumable state of one character's adventure.
//!
//! Values are treated as immutable snapshots: every transition returns a new
//! `GameState` so that a copy handed to the save queue is never observed
//! half-updated.

use serde::{Deserialize, Serialize};

use super::{Checkpoint, GameHistoryEntry, Scene};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub current_scene: Scene,
    #[serde(default)]
    pub history: Vec<GameHistoryEntry>,
    #[serde(default)]
    pub game_over: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,
}

impl GameState {
    pub fn new(opening_scene: Scene) -> Self {
        Self {
            current_scene: opening_scene,
            ..Default::default()
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn has_current_scene(&self) -> bool {
        !self.current_scene.is_blank()
    }

    /// Move the adventure forward: record `entry` and make `next_scene`
    /// current. An entry identical (by scene and choice) to the last one is
    /// not recorded twice in a row.
    pub fn advance(&self, entry: GameHistoryEntry, next_scene: Scene) -> GameState {
        let mut next = self.clone();
        let repeats_last = next.history.last().is_some_and(|last| last.same_event(&entry));
        if !repeats_last {
            next.history.push(entry);
        }
        next.current_scene = next_scene;
        next
    }

    /// Terminal copy of this state.
    pub fn concluded(&self) -> GameState {
        GameState {
            game_over: true,
            ..self.clone()
        }
    }

    /// The last `count` history entries, oldest first.
    pub fn recent_history(&self, count: usize) -> &[GameHistoryEntry] {
        let start = self.history.len().saturating_sub(count);
        &self.history[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opening() -> Scene {
        Scene::from_texts("scene-1", "You wake in a cell.", ["Call the guard", "Search"])
    }

    #[test]
    fn advance_appends_and_replaces_scene() {
        let state = GameState::new(opening());
        let next_scene = Scene::from_texts("scene-2", "The guard approaches.", ["Bribe"]);
        let next = state.advance(GameHistoryEntry::new("scene-1", "Call the guard"), next_scene.clone());

        assert_eq!(next.history.len(), 1);
        assert_eq!(next.current_scene, next_scene);
        // Input untouched
        assert!(state.history.is_empty());
        assert_eq!(state.current_scene, opening());
    }

    #[test]
    fn advance_skips_consecutive_duplicate() {
        let state = GameState::new(opening());
        let entry = GameHistoryEntry::new("scene-1", "Search");
        let once = state.advance(entry.clone(), opening());
        let twice = once.advance(entry.with_timestamp("2024-01-01"), opening());
        assert_eq!(twice.history.len(), 1);
    }

    #[test]
    fn recent_history_window() {
        let mut state = GameState::new(opening());
        for i in 0..5 {
            state = state.advance(GameHistoryEntry::new(format!("scene-{}", i), "Go"), opening());
        }
        let recent = state.recent_history(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].scene_id, "scene-3");
        assert_eq!(state.recent_history(50).len(), 5);
    }

    #[test]
    fn serializes_camel_case_and_omits_absent_fields() {
        let json = serde_json::to_value(GameState::new(opening())).unwrap();
        assert!(json.get("currentScene").is_some());
        assert_eq!(json["gameOver"], serde_json::json!(false));
        assert!(json.get("sessionId").is_none());
        assert!(json.get("checkpoint").is_none());
    }

    #[test]
    fn concluded_sets_game_over_only() {
        let state = GameState::new(opening()).with_session_id("abc");
        let done = state.concluded();
        assert!(done.game_over);
        assert_eq!(done.current_scene, state.current_scene);
        assert_eq!(done.session_id.as_deref(), Some("abc"));
    }
}
