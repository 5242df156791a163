//! Aggregate snapshot and repair sweep.
//!
//! The SQLite backend keeps no cached aggregates; counts come from the
//! `version_status_counts` view and the listings are plain queries.

use fieldrec_workflow::publish::apply_published;
use fieldrec_workflow::{
    AggregateSnapshot, ReconcileReport, StatusCounters, VersionRef, VersionStatus,
};
use sqlx::Row;
use tracing::{info, warn};

use crate::error::{DbError, Result};
use crate::rows::{published_from_row, version_from_row, version_no};
use crate::workflow_store::update_version_row;
use crate::RecordDb;

impl RecordDb {
    /// Counters and approved/submitted listings as currently stored.
    pub async fn aggregate_snapshot(&self) -> Result<AggregateSnapshot> {
        let mut snapshot = AggregateSnapshot::empty();
        snapshot.counters = self.status_counters().await?;
        snapshot.approved = self.version_refs(VersionStatus::Approved).await?;
        snapshot.submitted = self.version_refs(VersionStatus::Submitted).await?;
        Ok(snapshot)
    }

    async fn status_counters(&self) -> Result<StatusCounters> {
        let rows = sqlx::query("SELECT status, total FROM version_status_counts")
            .fetch_all(&self.pool)
            .await?;

        let mut counters = StatusCounters::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let total: i64 = row.try_get("total")?;
            let status = VersionStatus::parse(&status)
                .ok_or_else(|| DbError::corrupt(format!("unknown status: {}", status)))?;
            let total = u64::try_from(total)
                .map_err(|_| DbError::corrupt(format!("negative count for {}", status)))?;
            match status {
                VersionStatus::Draft => counters.draft = total,
                VersionStatus::Submitted => counters.submitted = total,
                VersionStatus::Approved => counters.approved = total,
                VersionStatus::Rejected => counters.rejected = total,
                VersionStatus::ReturnedForRevision => counters.returned_for_revision = total,
            }
        }
        Ok(counters)
    }

    async fn version_refs(&self, status: VersionStatus) -> Result<Vec<VersionRef>> {
        let rows = sqlx::query(
            "SELECT entity_id, version_no FROM versions WHERE status = ? ORDER BY entity_id, version_no",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let raw: String = row.try_get("entity_id")?;
                Ok(VersionRef {
                    entity_id: raw
                        .try_into()
                        .map_err(|e| DbError::corrupt(format!("entity_id: {}", e)))?,
                    version_no: version_no(row.try_get("version_no")?)?,
                })
            })
            .collect()
    }

    /// Marks approved every version still `submitted` that has a published
    /// row, then recomputes the snapshot. Versions in any other status are
    /// left alone.
    pub async fn aggregates_reconcile(&self) -> Result<ReconcileReport> {
        let rows = sqlx::query(
            r#"
            SELECT v.* FROM versions v
            JOIN published_records p
              ON p.entity_id = v.entity_id AND p.version_no = v.version_no
            WHERE v.status = 'submitted'
            ORDER BY v.entity_id, v.version_no
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut repaired = Vec::new();
        for row in &rows {
            let mut version = version_from_row(row)?;
            let published = sqlx::query(
                "SELECT * FROM published_records WHERE entity_id = ? AND version_no = ?",
            )
            .bind(version.entity_id.as_str())
            .bind(i64::from(version.version_no))
            .fetch_one(&self.pool)
            .await?;
            let published = published_from_row(&published)?;

            warn!(
                version = %version.label(),
                status = %version.status,
                "published record without approved version; repairing"
            );
            apply_published(&mut version, &published);

            let mut conn = self.pool.acquire().await?;
            if update_version_row(&mut *conn, &version, VersionStatus::Submitted).await? > 0 {
                repaired.push(VersionRef::from(&version));
            }
        }

        let entities: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities")
            .fetch_one(&self.pool)
            .await?;
        let snapshot = self.aggregate_snapshot().await?;
        let versions = snapshot.counters.total() as usize;

        info!(
            entities,
            versions,
            repaired = repaired.len(),
            "reconciliation complete"
        );
        Ok(ReconcileReport {
            entities_scanned: entities as usize,
            versions_scanned: versions,
            repaired,
            snapshot,
        })
    }
}
