//! Events broadcast to presentation and progression collaborators.

use storyloom_domain::{Scene, SessionKey};

use super::save_queue::SaveError;
use super::scene_parser::ParseStrategy;

/// Outcome of a player's choice, for reward and achievement collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceCommitted {
    pub session_key: SessionKey,
    /// Text of the option the player picked
    pub choice_text: String,
    /// History length after the choice
    pub history_len: usize,
    /// Whether a new scene replaced the current one
    pub scene_committed: bool,
}

/// Persistence progress for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveStatus {
    Queued { session_key: SessionKey, pending: usize },
    Saved { session_key: SessionKey, last_modified: String },
    Failed { session_key: SessionKey, error: SaveError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Incremental generator text, with the description parsed so far
    SceneToken {
        session_key: SessionKey,
        text: String,
        provisional_description: String,
    },
    /// A parsed, validated scene became current
    SceneCommitted {
        session_key: SessionKey,
        scene: Scene,
        strategy: ParseStrategy,
    },
    ChoiceCommitted(ChoiceCommitted),
    Save(SaveStatus),
}
