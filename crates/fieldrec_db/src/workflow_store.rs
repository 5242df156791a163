//! [`WorkflowStore`] implementation.

use async_trait::async_trait;
use fieldrec_ids::EntityId;
use fieldrec_workflow::{
    ApprovalCommit, ApprovalOutcome, Comment, EntityRegistration, NewVersion, PublishedRecord,
    ReconcileReport, VersionRecord, VersionStatus, WorkflowStore,
};
use sqlx::sqlite::SqliteConnection;
use tracing::{debug, info};

use crate::error::{DbError, Result};
use crate::rows::{comment_from_row, entity_from_row, published_from_row, version_from_row};
use crate::RecordDb;

type WorkflowResult<T> = fieldrec_workflow::Result<T>;

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

/// Writes every mutable column of `record` if the row is still in
/// `expected`. Returns the number of rows changed.
pub(crate) async fn update_version_row(
    conn: &mut SqliteConnection,
    record: &VersionRecord,
    expected: VersionStatus,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE versions SET
            status = ?,
            payload = ?,
            updated_at = ?,
            submitted_at = ?,
            submitted_by = ?,
            approved_at = ?,
            approved_by = ?,
            rejected_at = ?,
            rejected_by = ?,
            returned_at = ?,
            returned_by = ?,
            review_comments = ?,
            rejection_reason = ?
        WHERE entity_id = ? AND version_no = ? AND status = ?
        "#,
    )
    .bind(record.status.as_str())
    .bind(serde_json::to_string(&record.payload)?)
    .bind(RecordDb::to_millis(record.updated_at))
    .bind(record.submitted_at.map(RecordDb::to_millis))
    .bind(record.submitted_by.as_ref().map(|u| u.as_str()))
    .bind(record.approved_at.map(RecordDb::to_millis))
    .bind(record.approved_by.as_ref().map(|u| u.as_str()))
    .bind(record.rejected_at.map(RecordDb::to_millis))
    .bind(record.rejected_by.as_ref().map(|u| u.as_str()))
    .bind(record.returned_at.map(RecordDb::to_millis))
    .bind(record.returned_by.as_ref().map(|u| u.as_str()))
    .bind(record.review_comments.as_deref())
    .bind(record.rejection_reason.as_deref())
    .bind(record.entity_id.as_str())
    .bind(i64::from(record.version_no))
    .bind(expected.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

async fn insert_comment_row(conn: &mut SqliteConnection, comment: &Comment) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO comments (comment_id, entity_id, version_no, comment_type, text, author, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(comment.comment_id.as_str())
    .bind(comment.entity_id.as_str())
    .bind(i64::from(comment.version_no))
    .bind(comment.comment_type.as_str())
    .bind(&comment.text)
    .bind(comment.author.as_str())
    .bind(RecordDb::to_millis(comment.timestamp))
    .execute(&mut *conn)
    .await
    .map_err(|err| {
        if is_foreign_key_violation(&err) {
            DbError::not_found(format!("{} v{}", comment.entity_id, comment.version_no))
        } else {
            DbError::from(err)
        }
    })?;
    Ok(())
}

// Domain methods, returning database errors.
impl RecordDb {
    pub async fn entity_register(&self, registration: &EntityRegistration) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO entities (entity_id, entity_kind, project, created_by, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(registration.entity_id.as_str())
        .bind(registration.entity_kind.as_str())
        .bind(registration.project.as_str())
        .bind(registration.created_by.as_str())
        .bind(RecordDb::to_millis(registration.created_at))
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                DbError::constraint(format!(
                    "entity {} already registered",
                    registration.entity_id
                ))
            } else {
                DbError::from(err)
            }
        })?;
        Ok(())
    }

    pub async fn entity_get(&self, entity_id: &EntityId) -> Result<Option<EntityRegistration>> {
        let row = sqlx::query("SELECT * FROM entities WHERE entity_id = ?")
            .bind(entity_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(entity_from_row).transpose()
    }

    /// Allocates the next number and inserts the draft in one transaction.
    ///
    /// The counter upsert is the first statement, so the transaction takes
    /// the write lock before reading anything.
    pub async fn version_insert(&self, new: NewVersion) -> Result<VersionRecord> {
        let mut tx = self.pool.begin().await?;

        let allocated: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO entity_counters (entity_id, last_version) VALUES (?, 1)
            ON CONFLICT(entity_id) DO UPDATE SET last_version = last_version + 1
            RETURNING last_version
            "#,
        )
        .bind(new.entity_id.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| {
            if is_foreign_key_violation(&err) {
                DbError::not_found(format!("entity {}", new.entity_id))
            } else {
                DbError::from(err)
            }
        })?;
        let version_no = crate::rows::version_no(allocated)?;

        let record = VersionRecord::draft(new, version_no);
        sqlx::query(
            r#"
            INSERT INTO versions (
                entity_id, version_no, entity_kind, status, payload, based_on,
                created_by, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.entity_id.as_str())
        .bind(i64::from(record.version_no))
        .bind(record.entity_kind.as_str())
        .bind(record.status.as_str())
        .bind(serde_json::to_string(&record.payload)?)
        .bind(record.based_on.map(i64::from))
        .bind(record.created_by.as_str())
        .bind(RecordDb::to_millis(record.created_at))
        .bind(RecordDb::to_millis(record.updated_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(version = %record.label(), "allocated version");
        Ok(record)
    }

    pub async fn version_get(
        &self,
        entity_id: &EntityId,
        version_no: u32,
    ) -> Result<Option<VersionRecord>> {
        let row = sqlx::query("SELECT * FROM versions WHERE entity_id = ? AND version_no = ?")
            .bind(entity_id.as_str())
            .bind(i64::from(version_no))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(version_from_row).transpose()
    }

    pub async fn version_list(&self, entity_id: &EntityId) -> Result<Vec<VersionRecord>> {
        let rows =
            sqlx::query("SELECT * FROM versions WHERE entity_id = ? ORDER BY version_no DESC")
                .bind(entity_id.as_str())
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(version_from_row).collect()
    }

    pub async fn version_update(
        &self,
        record: &VersionRecord,
        expected: VersionStatus,
        comment: Option<&Comment>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        if update_version_row(&mut *tx, record, expected).await? == 0 {
            tx.rollback().await?;
            debug!(version = %record.label(), expected = %expected, "compare-and-set missed");
            return Ok(false);
        }
        if let Some(comment) = comment {
            insert_comment_row(&mut *tx, comment).await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    pub async fn published_get(
        &self,
        entity_id: &EntityId,
        version_no: u32,
    ) -> Result<Option<PublishedRecord>> {
        let row = sqlx::query(
            "SELECT * FROM published_records WHERE entity_id = ? AND version_no = ?",
        )
        .bind(entity_id.as_str())
        .bind(i64::from(version_no))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(published_from_row).transpose()
    }

    pub async fn published_latest(&self, entity_id: &EntityId) -> Result<Option<PublishedRecord>> {
        let row = sqlx::query(
            "SELECT * FROM published_records WHERE entity_id = ? ORDER BY version_no DESC LIMIT 1",
        )
        .bind(entity_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(published_from_row).transpose()
    }

    /// Published record, version status and comment in one transaction.
    pub async fn approval_commit(&self, commit: &ApprovalCommit) -> Result<ApprovalOutcome> {
        let published = &commit.published;
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO published_records (
                entity_id, version_no, entity_kind, payload, published_at, approved_by
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(entity_id, version_no) DO NOTHING
            "#,
        )
        .bind(published.entity_id.as_str())
        .bind(i64::from(published.version_no))
        .bind(published.entity_kind.as_str())
        .bind(serde_json::to_string(&published.payload)?)
        .bind(RecordDb::to_millis(published.published_at))
        .bind(published.approved_by.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            let existing = self
                .published_get(&published.entity_id, published.version_no)
                .await?
                .ok_or_else(|| {
                    DbError::corrupt(format!(
                        "published record {} v{} conflicted but cannot be read",
                        published.entity_id, published.version_no
                    ))
                })?;
            debug!(version = %commit.version.label(), "already published");
            return Ok(ApprovalOutcome::AlreadyPublished(existing));
        }

        if update_version_row(&mut *tx, &commit.version, VersionStatus::Submitted).await? == 0 {
            tx.rollback().await?;
            return Err(DbError::constraint(format!(
                "{} is no longer submitted; only submitted versions can be approved",
                commit.version.label()
            )));
        }
        if let Some(comment) = &commit.comment {
            insert_comment_row(&mut *tx, comment).await?;
        }
        tx.commit().await?;

        info!(version = %commit.version.label(), approver = %published.approved_by, "approval committed");
        Ok(ApprovalOutcome::Published(published.clone()))
    }

    pub async fn comment_append(&self, comment: &Comment) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_comment_row(&mut *conn, comment).await
    }

    /// Chronological; ties keep insertion order.
    pub async fn comment_list(
        &self,
        entity_id: &EntityId,
        version_no: Option<u32>,
    ) -> Result<Vec<Comment>> {
        let rows = match version_no {
            Some(version_no) => {
                sqlx::query(
                    r#"
                    SELECT * FROM comments
                    WHERE entity_id = ? AND version_no = ?
                    ORDER BY created_at ASC, rowid ASC
                    "#,
                )
                .bind(entity_id.as_str())
                .bind(i64::from(version_no))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM comments WHERE entity_id = ? ORDER BY created_at ASC, rowid ASC",
                )
                .bind(entity_id.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(comment_from_row).collect()
    }
}

#[async_trait]
impl WorkflowStore for RecordDb {
    async fn register_entity(&self, registration: &EntityRegistration) -> WorkflowResult<()> {
        Ok(self.entity_register(registration).await?)
    }

    async fn get_entity(&self, entity_id: &EntityId) -> WorkflowResult<Option<EntityRegistration>> {
        Ok(self.entity_get(entity_id).await?)
    }

    async fn insert_version(&self, new: NewVersion) -> WorkflowResult<VersionRecord> {
        Ok(self.version_insert(new).await?)
    }

    async fn get_version(
        &self,
        entity_id: &EntityId,
        version_no: u32,
    ) -> WorkflowResult<Option<VersionRecord>> {
        Ok(self.version_get(entity_id, version_no).await?)
    }

    async fn list_versions(&self, entity_id: &EntityId) -> WorkflowResult<Vec<VersionRecord>> {
        Ok(self.version_list(entity_id).await?)
    }

    async fn update_version(
        &self,
        record: &VersionRecord,
        expected: VersionStatus,
        comment: Option<&Comment>,
    ) -> WorkflowResult<bool> {
        Ok(self.version_update(record, expected, comment).await?)
    }

    async fn get_published(
        &self,
        entity_id: &EntityId,
        version_no: u32,
    ) -> WorkflowResult<Option<PublishedRecord>> {
        Ok(self.published_get(entity_id, version_no).await?)
    }

    async fn latest_published(
        &self,
        entity_id: &EntityId,
    ) -> WorkflowResult<Option<PublishedRecord>> {
        Ok(self.published_latest(entity_id).await?)
    }

    async fn commit_approval(&self, commit: &ApprovalCommit) -> WorkflowResult<ApprovalOutcome> {
        Ok(self.approval_commit(commit).await?)
    }

    async fn append_comment(&self, comment: &Comment) -> WorkflowResult<()> {
        Ok(self.comment_append(comment).await?)
    }

    async fn list_comments(
        &self,
        entity_id: &EntityId,
        version_no: Option<u32>,
    ) -> WorkflowResult<Vec<Comment>> {
        Ok(self.comment_list(entity_id, version_no).await?)
    }

    async fn reconcile(&self) -> WorkflowResult<ReconcileReport> {
        Ok(self.aggregates_reconcile().await?)
    }
}
