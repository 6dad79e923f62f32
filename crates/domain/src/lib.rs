//! Storyloom Domain - the game session data model.
//!
//! Pure data types and pure functions only: scenes, history, checkpoints,
//! the live [`GameState`], and the [`VersionedState`] record that crosses the
//! persistence boundary. No I/O and no async here.

extern crate self as storyloom_domain;

pub mod common;
pub mod entities;
pub mod error;
pub mod ids;
pub mod value_objects;

pub use entities::{Checkpoint, Choice, GameHistoryEntry, GameState, Scene};
pub use error::DomainError;
pub use ids::SessionKey;
pub use value_objects::{SchemaVersion, VersionedState};

// Re-export the helpers that every engine component leans on
pub use common::datetime::{format_timestamp, parse_datetime, parse_timestamp};
pub use common::recency::{compare_recency, compare_timestamps};
