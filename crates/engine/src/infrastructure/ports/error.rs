//! Error types for port operations.

use std::time::Duration;

/// Session store failures, split by whether retrying can help.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Network blip, lock contention, busy database - worth retrying.
    #[error("Transient store failure in {operation}: {message}")]
    Transient {
        operation: &'static str,
        message: String,
    },

    /// Constraint violation or rejected write - retrying will not help.
    #[error("Store rejected {operation}: {message}")]
    Terminal {
        operation: &'static str,
        message: String,
    },

    /// Record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn transient(operation: &'static str, message: impl ToString) -> Self {
        Self::Transient {
            operation,
            message: message.to_string(),
        }
    }

    pub fn terminal(operation: &'static str, message: impl ToString) -> Self {
        Self::Terminal {
            operation,
            message: message.to_string(),
        }
    }

    pub fn serialization(message: impl ToString) -> Self {
        Self::Serialization(message.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("Generation request failed: {0}")]
    RequestFailed(String),
    #[error("Invalid generation stream: {0}")]
    InvalidResponse(String),
    #[error("Generation stream ended without a completion signal")]
    Incomplete,
    #[error("Generation timed out after {0:?}")]
    TimedOut(Duration),
    #[error("Generation cancelled")]
    Cancelled,
}
