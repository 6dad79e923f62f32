//! Use cases - the session state engine.
//!
//! Each module covers one concern of keeping a game session alive across
//! turns, reloads and schema changes. `session` orchestrates the rest.

pub mod checkpoint;
pub mod conflict;
pub mod events;
pub mod save_queue;
pub mod scene_parser;
pub mod session;
pub mod validation;
pub mod versioning;

// Re-export main types
pub use checkpoint::{CheckpointError, CheckpointManager};
pub use conflict::{resolve, SessionSnapshot};
pub use events::{ChoiceCommitted, EngineEvent, SaveStatus};
pub use save_queue::{SaveError, SaveQueue, SaveQueueConfig};
pub use scene_parser::{parse_scene, ParseStrategy, ParsedScene, SceneStream};
pub use session::{ResumeError, SessionEngine, SessionSettings, TurnError};
pub use validation::{validate, validate_document, ValidationError, ValidationReport};
pub use versioning::{MigrationError, StateVersioner};
