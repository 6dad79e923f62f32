use serde::{Deserialize, Serialize};

use super::{GameHistoryEntry, Scene};

/// A save-point embedded in a game state. Holds deep copies, never references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub scene: Scene,
    pub history: Vec<GameHistoryEntry>,
    pub timestamp: String,
}

impl Checkpoint {
    pub fn new(scene: Scene, history: Vec<GameHistoryEntry>, timestamp: impl Into<String>) -> Self {
        Self {
            scene,
            history,
            timestamp: timestamp.into(),
        }
    }
}
