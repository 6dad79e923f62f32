//! Session store port.
//!
//! The engine needs exactly two primitives from durable storage: read the
//! newest record for a session, and append a new one.

use async_trait::async_trait;
use serde_json::Value;
use storyloom_domain::{SessionKey, VersionedState};

use super::error::StoreError;

/// A session record exactly as it came out of storage.
///
/// Old records predate the current schema, so they are handed over untyped;
/// only the versioner turns one into a [`storyloom_domain::GameState`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredState {
    document: Value,
}

impl StoredState {
    pub fn new(document: Value) -> Self {
        Self { document }
    }

    pub fn from_versioned(record: &VersionedState) -> Result<Self, StoreError> {
        serde_json::to_value(record)
            .map(Self::new)
            .map_err(StoreError::serialization)
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn into_document(self) -> Value {
        self.document
    }

    /// The `version` field, if the record declares one.
    pub fn declared_version(&self) -> Option<&str> {
        self.document.get("version").and_then(Value::as_str)
    }
}

impl From<Value> for StoredState {
    fn from(document: Value) -> Self {
        Self::new(document)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Newest record for the session, or `None` if it was never saved.
    async fn load_latest(&self, key: &SessionKey) -> Result<Option<StoredState>, StoreError>;

    /// Durably write a new record for the session.
    async fn persist(&self, key: &SessionKey, record: &VersionedState) -> Result<(), StoreError>;
}
