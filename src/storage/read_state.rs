use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadStateError {
    #[error("Another process has the read-state database locked")]
    Locked,

    #[error("Read-state migration failed: {0}")]
    Migration(String),

    #[error("Read-state database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl ReadStateError {
    fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
        {
            return ReadStateError::Locked;
        }
        ReadStateError::Other(err)
    }
}

/// "Already consumed" lookup by entry id.
///
/// The pipeline only ever reads through this trait; recording consumption is
/// the job of whoever plays the entry.
#[async_trait]
pub trait ReadState: Send + Sync {
    async fn is_consumed(&self, entry_id: &str) -> bool;
}

// ============================================================================
// SQLite
// ============================================================================

#[derive(Clone)]
pub struct SqliteReadState {
    pool: SqlitePool,
}

impl SqliteReadState {
    /// Opens (creating if needed) the read-state database and runs migrations.
    pub async fn open(path: &str) -> Result<Self, ReadStateError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(ReadStateError::from_sqlx)?
            .pragma("busy_timeout", "5000");
        // Every connection to :memory: is a separate database, so pin to one
        let max_connections = if path == ":memory:" { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(ReadStateError::from_sqlx)?;

        let store = Self { pool };
        store
            .migrate()
            .await
            .map_err(|e| ReadStateError::Migration(e.to_string()))?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS consumed_entries (
                entry_id TEXT PRIMARY KEY,
                consumed_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Marks an entry as consumed (idempotent). Returns whether it changed.
    pub async fn mark_consumed(&self, entry_id: &str) -> Result<bool, ReadStateError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let result = sqlx::query(
            "INSERT INTO consumed_entries (entry_id, consumed_at) VALUES (?, ?) ON CONFLICT(entry_id) DO NOTHING",
        )
        .bind(entry_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(ReadStateError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn check(&self, entry_id: &str) -> Result<bool, ReadStateError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM consumed_entries WHERE entry_id = ?")
                .bind(entry_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(ReadStateError::from_sqlx)?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl ReadState for SqliteReadState {
    async fn is_consumed(&self, entry_id: &str) -> bool {
        match self.check(entry_id).await {
            Ok(consumed) => consumed,
            Err(e) => {
                tracing::warn!(entry_id = %entry_id, error = %e, "Read-state lookup failed, treating as unconsumed");
                false
            }
        }
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryReadState {
    consumed: Mutex<HashSet<String>>,
}

impl MemoryReadState {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            consumed: Mutex::new(ids.into_iter().map(Into::into).collect()),
        }
    }

    pub fn mark_consumed(&self, entry_id: &str) {
        self.consumed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry_id.to_string());
    }
}

#[async_trait]
impl ReadState for MemoryReadState {
    async fn is_consumed(&self, entry_id: &str) -> bool {
        self.consumed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(entry_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_mark_and_check() {
        let store = SqliteReadState::open(":memory:").await.unwrap();
        assert!(!store.is_consumed("https://example.com/a").await);

        assert!(store.mark_consumed("https://example.com/a").await.unwrap());
        assert!(store.is_consumed("https://example.com/a").await);
    }

    #[tokio::test]
    async fn test_sqlite_mark_is_idempotent() {
        let store = SqliteReadState::open(":memory:").await.unwrap();
        assert!(store.mark_consumed("a").await.unwrap());
        assert!(!store.mark_consumed("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_read_state() {
        let store = MemoryReadState::new(["a"]);
        assert!(store.is_consumed("a").await);
        assert!(!store.is_consumed("b").await);
        store.mark_consumed("b");
        assert!(store.is_consumed("b").await);
    }
}
