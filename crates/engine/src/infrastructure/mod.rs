//! Infrastructure implementations.
//!
//! Port traits plus the adapters that implement them: session stores, the
//! generation backend client, and the clock.

pub mod clock;
pub mod ollama;
pub mod ports;
pub mod prompt_templates;
pub mod resilient_generation;
pub mod retry;
pub mod session_store;
