//! Port traits for infrastructure boundaries.
//!
//! These are the ONLY abstractions in the engine. Everything else is concrete types.
//! Ports exist for:
//! - Session persistence (could swap SQLite -> Postgres, or a remote API)
//! - Text generation (could swap Ollama -> Claude/OpenAI)
//! - Clock (for testing)

mod error;
mod external;
mod store;
mod testing;

// =============================================================================
// Error Types
// =============================================================================
pub use error::{GenerationError, StoreError};

// =============================================================================
// Session Store Port
// =============================================================================
pub use store::{SessionStore, StoredState};

// =============================================================================
// External Service Ports
// =============================================================================
pub use external::{GenerationEvent, GenerationPort, GenerationRequest, TokenStream};

// =============================================================================
// Test-Only Mocks (only available during test builds)
// =============================================================================
#[cfg(test)]
pub use store::MockSessionStore;

#[cfg(test)]
pub use testing::MockClockPort;

// =============================================================================
// Testing Ports
// =============================================================================
pub use testing::ClockPort;
