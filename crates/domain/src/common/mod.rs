//! Common utility functions shared across the domain and the engine.
//!
//! Pure functions only - no side effects, no I/O.

pub mod datetime;
pub mod recency;
