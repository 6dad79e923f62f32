//! In-memory session store for development and testing
//!
//! Keeps every record ever written, per session, as JSON documents so that
//! reads go through exactly the same decode path as a real database.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use storyloom_domain::{SessionKey, VersionedState};
use tokio::sync::RwLock;

use crate::infrastructure::ports::{SessionStore, StoreError, StoredState};

#[derive(Default)]
pub struct InMemorySessionStore {
    records: RwLock<HashMap<SessionKey, Vec<Value>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raw document as if an older client had written it.
    pub async fn insert_raw(&self, key: &SessionKey, document: Value) {
        self.records
            .write()
            .await
            .entry(key.clone())
            .or_default()
            .push(document);
    }

    /// Every record written for a session, oldest first.
    pub async fn records(&self, key: &SessionKey) -> Vec<StoredState> {
        self.records
            .read()
            .await
            .get(key)
            .map(|docs| docs.iter().cloned().map(StoredState::new).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load_latest(&self, key: &SessionKey) -> Result<Option<StoredState>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(key)
            .and_then(|docs| docs.last())
            .cloned()
            .map(StoredState::new))
    }

    async fn persist(&self, key: &SessionKey, record: &VersionedState) -> Result<(), StoreError> {
        let stored = StoredState::from_versioned(record)?;
        self.insert_raw(key, stored.into_document()).await;
        Ok(())
    }
}
