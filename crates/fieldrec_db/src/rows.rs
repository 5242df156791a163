//! Row decoding.

use chrono::{DateTime, Utc};
use fieldrec_ids::{CommentId, IdParseError};
use fieldrec_workflow::{
    Comment, CommentType, EntityKind, EntityRegistration, PublishedRecord, VersionRecord,
    VersionStatus,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::{DbError, Result};
use crate::RecordDb;

pub(crate) fn version_no(raw: i64) -> Result<u32> {
    u32::try_from(raw)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| DbError::corrupt(format!("version number out of range: {}", raw)))
}

fn id<T>(row: &SqliteRow, column: &str) -> Result<T>
where
    T: TryFrom<String, Error = IdParseError>,
{
    let raw: String = row.try_get(column)?;
    T::try_from(raw).map_err(|e| DbError::corrupt(format!("{}: {}", column, e)))
}

fn opt_id<T>(row: &SqliteRow, column: &str) -> Result<Option<T>>
where
    T: TryFrom<String, Error = IdParseError>,
{
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|value| T::try_from(value).map_err(|e| DbError::corrupt(format!("{}: {}", column, e))))
        .transpose()
}

fn time(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    RecordDb::from_millis(row.try_get(column)?)
}

fn opt_time(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<i64> = row.try_get(column)?;
    raw.map(RecordDb::from_millis).transpose()
}

fn kind(row: &SqliteRow) -> Result<EntityKind> {
    let raw: String = row.try_get("entity_kind")?;
    EntityKind::parse(&raw).ok_or_else(|| DbError::corrupt(format!("unknown entity kind: {}", raw)))
}

fn payload(row: &SqliteRow) -> Result<serde_json::Value> {
    let raw: String = row.try_get("payload")?;
    Ok(serde_json::from_str(&raw)?)
}

pub(crate) fn entity_from_row(row: &SqliteRow) -> Result<EntityRegistration> {
    Ok(EntityRegistration {
        entity_id: id(row, "entity_id")?,
        entity_kind: kind(row)?,
        project: id(row, "project")?,
        created_by: id(row, "created_by")?,
        created_at: time(row, "created_at")?,
    })
}

pub(crate) fn version_from_row(row: &SqliteRow) -> Result<VersionRecord> {
    let status: String = row.try_get("status")?;
    let based_on: Option<i64> = row.try_get("based_on")?;
    Ok(VersionRecord {
        entity_id: id(row, "entity_id")?,
        entity_kind: kind(row)?,
        version_no: version_no(row.try_get("version_no")?)?,
        status: VersionStatus::parse(&status)
            .ok_or_else(|| DbError::corrupt(format!("unknown status: {}", status)))?,
        payload: payload(row)?,
        based_on: based_on.map(version_no).transpose()?,
        created_by: id(row, "created_by")?,
        created_at: time(row, "created_at")?,
        updated_at: time(row, "updated_at")?,
        submitted_at: opt_time(row, "submitted_at")?,
        submitted_by: opt_id(row, "submitted_by")?,
        approved_at: opt_time(row, "approved_at")?,
        approved_by: opt_id(row, "approved_by")?,
        rejected_at: opt_time(row, "rejected_at")?,
        rejected_by: opt_id(row, "rejected_by")?,
        returned_at: opt_time(row, "returned_at")?,
        returned_by: opt_id(row, "returned_by")?,
        review_comments: row.try_get("review_comments")?,
        rejection_reason: row.try_get("rejection_reason")?,
    })
}

pub(crate) fn published_from_row(row: &SqliteRow) -> Result<PublishedRecord> {
    Ok(PublishedRecord {
        entity_id: id(row, "entity_id")?,
        entity_kind: kind(row)?,
        version_no: version_no(row.try_get("version_no")?)?,
        payload: payload(row)?,
        published_at: time(row, "published_at")?,
        approved_by: id(row, "approved_by")?,
    })
}

pub(crate) fn comment_from_row(row: &SqliteRow) -> Result<Comment> {
    let comment_id: String = row.try_get("comment_id")?;
    let comment_type: String = row.try_get("comment_type")?;
    Ok(Comment {
        comment_id: CommentId::parse(&comment_id)
            .map_err(|e| DbError::corrupt(format!("comment_id: {}", e)))?,
        entity_id: id(row, "entity_id")?,
        version_no: version_no(row.try_get("version_no")?)?,
        comment_type: CommentType::parse(&comment_type)
            .ok_or_else(|| DbError::corrupt(format!("unknown comment type: {}", comment_type)))?,
        text: row.try_get("text")?,
        author: id(row, "author")?,
        timestamp: time(row, "created_at")?,
    })
}
