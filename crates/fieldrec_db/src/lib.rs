//! SQLite storage for the field record workflow.
//!
//! [`RecordDb`] implements [`fieldrec_workflow::WorkflowStore`]. Version
//! allocation and approval each run in a single transaction.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fieldrec_db::RecordDb;
//! use fieldrec_workflow::{StaticAccessGate, WorkflowService};
//!
//! let db = RecordDb::open("~/.fieldrec/fieldrec.db").await?;
//! let service = WorkflowService::new(Arc::new(db), Arc::new(StaticAccessGate::new()));
//! ```

mod aggregates;
mod error;
mod rows;
mod schema;
mod workflow_store;

pub use error::{DbError, Result};

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed record database.
#[derive(Clone)]
pub struct RecordDb {
    pool: SqlitePool,
}

impl RecordDb {
    /// Open or create a database at the given path.
    ///
    /// Creates all tables if they don't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;

        info!(path = %path.display(), "Database opened");
        Ok(db)
    }

    /// Open an existing database (fails if not exists).
    pub async fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(DbError::NotFound(format!(
                "Database not found: {}",
                path.display()
            )));
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Private in-memory database, for tests and the `memory` backend.
    ///
    /// A single connection that is never recycled, so the data lives as long
    /// as the pool.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Get the underlying connection pool (escape hatch for complex queries).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

// Timestamp utilities
impl RecordDb {
    /// Milliseconds since Unix epoch.
    pub fn to_millis(at: DateTime<Utc>) -> i64 {
        at.timestamp_millis()
    }

    /// Convert stored milliseconds back to a timestamp.
    pub fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| DbError::corrupt(format!("timestamp out of range: {}", millis)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_database() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nested").join("fieldrec.db");

        let db = RecordDb::open(&db_path).await.unwrap();
        assert!(db_path.exists());
        db.close().await;

        let reopened = RecordDb::open_existing(&db_path).await.unwrap();
        reopened.close().await;
    }

    #[tokio::test]
    async fn test_open_existing_missing_file() {
        let tmp = TempDir::new().unwrap();
        let err = RecordDb::open_existing(tmp.path().join("nope.db"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DbError::NotFound(_)));
    }

    #[test]
    fn test_millis_roundtrip() {
        let now = fieldrec_workflow::now();
        let millis = RecordDb::to_millis(now);
        assert_eq!(RecordDb::from_millis(millis).unwrap(), now);
        assert!(RecordDb::from_millis(i64::MAX).is_err());
    }
}
