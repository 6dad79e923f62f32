//! History entries - immutable records of choices already made.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameHistoryEntry {
    pub scene_id: String,
    /// Text of the chosen option at the time it was chosen
    pub choice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl GameHistoryEntry {
    pub fn new(scene_id: impl Into<String>, choice: impl Into<String>) -> Self {
        Self {
            scene_id: scene_id.into(),
            choice: choice.into(),
            scene_description: None,
            timestamp: None,
        }
    }

    pub fn with_scene_description(mut self, description: impl Into<String>) -> Self {
        self.scene_description = Some(description.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Identity used for de-duplication: timestamps and snapshots may differ
    /// between two records of the same event.
    pub fn identity(&self) -> (&str, &str) {
        (&self.scene_id, &self.choice)
    }

    pub fn same_event(&self, other: &GameHistoryEntry) -> bool {
        self.identity() == other.identity()
    }
}
