//! Save-points embedded in a game state.
//!
//! Pure transforms: both operations return a new state and leave their
//! argument alone. Nothing here touches storage.

use std::sync::Arc;

use storyloom_domain::{format_timestamp, Checkpoint, GameState};

use super::validation::ValidationError;
use crate::infrastructure::ports::ClockPort;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckpointError {
    #[error("There is no current scene to checkpoint")]
    NoCurrentScene,
    #[error("There is no checkpoint to restore")]
    NoCheckpoint,
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

#[derive(Clone)]
pub struct CheckpointManager {
    clock: Arc<dyn ClockPort>,
}

impl CheckpointManager {
    pub fn new(clock: Arc<dyn ClockPort>) -> Self {
        Self { clock }
    }

    /// Copy the current scene and history into a fresh checkpoint, replacing
    /// any previous one.
    pub fn create_checkpoint(&self, state: &GameState) -> Result<GameState, CheckpointError> {
        if !state.has_current_scene() {
            return Err(CheckpointError::NoCurrentScene);
        }

        let checkpoint = Checkpoint::new(
            state.current_scene.clone(),
            state.history.clone(),
            format_timestamp(self.clock.now()),
        );
        tracing::debug!(
            scene_id = %state.current_scene.id,
            history = state.history.len(),
            "Created checkpoint"
        );

        Ok(GameState {
            checkpoint: Some(checkpoint),
            ..state.clone()
        })
    }

    /// Rewind scene and history to the checkpoint. The checkpoint itself
    /// stays, so it can be restored again.
    pub fn restore_checkpoint(&self, state: &GameState) -> Result<GameState, CheckpointError> {
        let checkpoint = state.checkpoint.as_ref().ok_or(CheckpointError::NoCheckpoint)?;
        tracing::debug!(
            scene_id = %checkpoint.scene.id,
            discarded = state.history.len().saturating_sub(checkpoint.history.len()),
            "Restored checkpoint"
        );

        Ok(GameState {
            current_scene: checkpoint.scene.clone(),
            history: checkpoint.history.clone(),
            ..state.clone()
        })
    }
}
