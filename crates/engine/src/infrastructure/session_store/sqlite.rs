//! SQLite-backed session store.
//!
//! Append-only: every save inserts a row, the newest row per session wins on
//! load, and rows beyond the retention window are pruned after each write.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use storyloom_domain::{SessionKey, VersionedState};

use crate::infrastructure::ports::{ClockPort, SessionStore, StoreError, StoredState};

/// Records kept per session unless configured otherwise.
pub const DEFAULT_RETENTION: u32 = 20;

pub struct SqliteSessionStore {
    pool: SqlitePool,
    clock: Arc<dyn ClockPort>,
    retention: u32,
}

impl SqliteSessionStore {
    pub async fn new(db_path: &str, clock: Arc<dyn ClockPort>) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await
            .map_err(|e| classify("connect", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_key TEXT NOT NULL,
                version TEXT NOT NULL,
                last_modified TEXT NOT NULL,
                state_json TEXT NOT NULL,
                written_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| classify("create_table", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_session_records_key ON session_records (session_key, id)",
        )
        .execute(&pool)
        .await
        .map_err(|e| classify("create_index", e))?;

        Ok(Self {
            pool,
            clock,
            retention: DEFAULT_RETENTION,
        })
    }

    /// Keep at most `records` rows per session (minimum 1).
    pub fn with_retention(mut self, records: u32) -> Self {
        self.retention = records.max(1);
        self
    }

    async fn prune(&self, key: &SessionKey) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM session_records
            WHERE session_key = ?
              AND id NOT IN (
                SELECT id FROM session_records
                WHERE session_key = ?
                ORDER BY id DESC
                LIMIT ?
              )
            "#,
        )
        .bind(key.as_str())
        .bind(key.as_str())
        .bind(self.retention)
        .execute(&self.pool)
        .await
        .map_err(|e| classify("prune", e))?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn load_latest(&self, key: &SessionKey) -> Result<Option<StoredState>, StoreError> {
        let row = sqlx::query(
            "SELECT state_json FROM session_records WHERE session_key = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify("load_latest", e))?;

        match row {
            Some(row) => {
                let json: String = row.get("state_json");
                let document = serde_json::from_str(&json).map_err(StoreError::serialization)?;
                Ok(Some(StoredState::new(document)))
            }
            None => Ok(None),
        }
    }

    async fn persist(&self, key: &SessionKey, record: &VersionedState) -> Result<(), StoreError> {
        let json = serde_json::to_string(record).map_err(StoreError::serialization)?;
        let now = self.clock.now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO session_records (session_key, version, last_modified, state_json, written_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(key.as_str())
        .bind(record.version.to_string())
        .bind(&record.last_modified)
        .bind(json)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| classify("persist", e))?;

        if let Err(e) = self.prune(key).await {
            // The new record is already durable; pruning can wait for the next save.
            tracing::warn!(session_key = %key, error = %e, "Failed to prune old session records");
        }

        Ok(())
    }
}

/// Busy/locked databases and I/O hiccups are worth retrying; everything else is not.
fn classify(operation: &'static str, error: sqlx::Error) -> StoreError {
    match &error {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StoreError::transient(operation, error),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // SQLITE_BUSY, SQLITE_LOCKED
            Some("5") | Some("6") => StoreError::transient(operation, error),
            _ => StoreError::terminal(operation, error),
        },
        _ => StoreError::terminal(operation, error),
    }
}
