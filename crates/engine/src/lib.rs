//! Storyloom Engine library.
//!
//! Keeps an AI-narrated adventure's session state alive: parses streamed
//! scenes, validates and versions state, merges divergent snapshots, and
//! saves through a coalescing queue.
//!
//! ## Structure
//!
//! - `use_cases/` - Scene parsing, validation, versioning, merge, checkpoints, saving
//! - `infrastructure/` - External dependency implementations (ports + adapters)
//! - `config` - Environment configuration
//! - `app` - Application composition

pub mod app;
pub mod config;
pub mod infrastructure;
pub mod use_cases;

/// Shared builders and scripted adapters for tests.
#[cfg(test)]
pub mod test_fixtures;

pub use app::App;
