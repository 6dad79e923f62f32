//! Session lifecycle: start, resume, play, checkpoint and save.

mod engine;
mod recovery;

pub use engine::{ResumeError, SessionEngine, SessionSettings, TurnError, OPENING_CHOICE};
pub use recovery::{recover_state, RecoveryPath, RESUME_DESCRIPTION};
