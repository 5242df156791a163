//! Database schema creation.
//!
//! All CREATE statements live here. Timestamps are INTEGER milliseconds
//! since the Unix epoch.

use crate::error::Result;
use crate::RecordDb;
use tracing::info;

impl RecordDb {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS entities (
                entity_id TEXT PRIMARY KEY,
                entity_kind TEXT NOT NULL CHECK (entity_kind IN ('borehole_log', 'lab_test')),
                project TEXT NOT NULL,
                created_by TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Highest version number handed out per entity.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS entity_counters (
                entity_id TEXT PRIMARY KEY REFERENCES entities(entity_id),
                last_version INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS versions (
                entity_id TEXT NOT NULL REFERENCES entities(entity_id),
                version_no INTEGER NOT NULL CHECK (version_no > 0),
                entity_kind TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN (
                    'draft', 'submitted', 'approved', 'rejected', 'returned_for_revision'
                )),
                payload TEXT NOT NULL,
                based_on INTEGER,
                created_by TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                submitted_at INTEGER,
                submitted_by TEXT,
                approved_at INTEGER,
                approved_by TEXT,
                rejected_at INTEGER,
                rejected_by TEXT,
                returned_at INTEGER,
                returned_by TEXT,
                review_comments TEXT,
                rejection_reason TEXT,
                PRIMARY KEY (entity_id, version_no)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_versions_status ON versions(status)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS published_records (
                entity_id TEXT NOT NULL,
                version_no INTEGER NOT NULL,
                entity_kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                published_at INTEGER NOT NULL,
                approved_by TEXT NOT NULL,
                PRIMARY KEY (entity_id, version_no),
                FOREIGN KEY (entity_id, version_no) REFERENCES versions(entity_id, version_no)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS comments (
                comment_id TEXT PRIMARY KEY,
                entity_id TEXT NOT NULL,
                version_no INTEGER NOT NULL,
                comment_type TEXT NOT NULL CHECK (comment_type IN (
                    'submission', 'approval', 'rejection', 'correction_required'
                )),
                text TEXT NOT NULL,
                author TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (entity_id, version_no) REFERENCES versions(entity_id, version_no)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_comments_version ON comments(entity_id, version_no, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE VIEW IF NOT EXISTS version_status_counts AS
                SELECT status, COUNT(*) AS total FROM versions GROUP BY status"#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database schema verified");
        Ok(())
    }
}
