//! Approval: copy a submitted version into the published record set.
//!
//! `approve` is safe to retry. If a published record already exists for the
//! version it is returned unchanged, and a version left `submitted` by an
//! interrupted earlier attempt is brought up to `approved` first.

use std::sync::Arc;

use fieldrec_ids::{EntityId, UserId};
use tracing::{debug, info};

use crate::error::{Result, StorageError, WorkflowError};
use crate::state_machine::{note_text, WorkflowStateMachine};
use crate::store::{ApprovalCommit, ApprovalOutcome, WorkflowStore};
use crate::types::{
    ensure_version_no, now, Comment, CommentType, PublishedRecord, VersionRecord, VersionStatus,
    WorkflowAction,
};

/// Marks `version` approved as recorded by its published record.
pub fn apply_published(version: &mut VersionRecord, published: &PublishedRecord) {
    version.status = VersionStatus::Approved;
    version.approved_by = Some(published.approved_by.clone());
    version.approved_at = Some(published.published_at);
    version.updated_at = published.published_at;
}

/// The published record an approved version implies. Approver and time come
/// from the version, so every caller derives the same document.
pub fn published_from_approved(version: &VersionRecord) -> Result<PublishedRecord> {
    match (&version.approved_by, version.approved_at) {
        (Some(approver), Some(at)) if version.status == VersionStatus::Approved => {
            Ok(PublishedRecord::from_version(version, approver, at))
        }
        _ => Err(StorageError::corrupt_record(format!(
            "{} is {} without approver and approval time",
            version.label(),
            version.status
        ))
        .into()),
    }
}

pub struct PublishEngine {
    store: Arc<dyn WorkflowStore>,
}

impl PublishEngine {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    /// Publishes a submitted version and marks it approved.
    ///
    /// Returns `NotFound` for an unknown version and `Conflict` for a version
    /// that is not submitted and has never been published.
    pub async fn approve(
        &self,
        entity_id: &EntityId,
        version_no: u32,
        approver: &UserId,
        comments: Option<&str>,
    ) -> Result<PublishedRecord> {
        ensure_version_no(version_no)?;
        let version = self
            .store
            .get_version(entity_id, version_no)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("{} v{}", entity_id, version_no)))?;

        if let Some(existing) = self.store.get_published(entity_id, version_no).await? {
            if version.status == VersionStatus::Submitted {
                self.finish(&version, &existing, approver, comments).await?;
            }
            debug!(version = %version.label(), "approve: already published");
            return Ok(existing);
        }

        if version.status != VersionStatus::Submitted {
            return Err(WorkflowError::conflict(format!(
                "{} is {}; only submitted versions can be approved",
                version.label(),
                version.status
            )));
        }

        let at = now();
        let approved =
            WorkflowStateMachine::prepare(&version, WorkflowAction::Approve, approver, comments, at)?;
        let published = published_from_approved(&approved)?;
        let comment = note_text(comments).map(|text| {
            Comment::new(
                entity_id.clone(),
                version_no,
                CommentType::Approval,
                text,
                approver.clone(),
                at,
            )
        });
        let commit = ApprovalCommit {
            version: approved,
            published,
            comment,
        };

        match self.store.commit_approval(&commit).await? {
            ApprovalOutcome::Published(record) => {
                info!(
                    version = %version.label(),
                    approver = %approver,
                    "published version"
                );
                Ok(record)
            }
            ApprovalOutcome::AlreadyPublished(existing) => {
                if let Some(current) = self.store.get_version(entity_id, version_no).await? {
                    if current.status == VersionStatus::Submitted {
                        self.finish(&current, &existing, approver, comments).await?;
                    }
                }
                Ok(existing)
            }
        }
    }

    /// Completes an approval whose published record was written but whose
    /// version is still `submitted`. Approver and time come from the
    /// published record so repeated finishes write the same document.
    async fn finish(
        &self,
        version: &VersionRecord,
        published: &PublishedRecord,
        caller: &UserId,
        comments: Option<&str>,
    ) -> Result<()> {
        let mut approved = version.clone();
        apply_published(&mut approved, published);
        let text = note_text(comments);
        if text.is_some() {
            approved.review_comments = text.clone();
        }

        let has_approval_comment = self
            .store
            .list_comments(&version.entity_id, Some(version.version_no))
            .await?
            .iter()
            .any(|c| c.comment_type == CommentType::Approval);
        let comment = match text {
            Some(text) if !has_approval_comment => Some(Comment::new(
                version.entity_id.clone(),
                version.version_no,
                CommentType::Approval,
                text,
                caller.clone(),
                now(),
            )),
            _ => None,
        };

        if self
            .store
            .update_version(&approved, VersionStatus::Submitted, comment.as_ref())
            .await?
        {
            info!(version = %version.label(), "finished interrupted approval");
        } else {
            debug!(version = %version.label(), "interrupted approval finished elsewhere");
        }
        Ok(())
    }
}
