//! Status transitions of a single version.
//!
//! ```text
//! draft ──submit──▶ submitted ──approve──▶ approved
//!                       │
//!                       ├──reject──▶ rejected
//!                       └──return_for_revision──▶ returned_for_revision
//! ```
//!
//! Persisting a transition is a compare-and-set on the prior status: a
//! conditional `UPDATE` in SQLite, a create-only revision write on the object
//! store. Of two racing transitions on one version exactly one wins and the
//! other sees `InvalidState`, or `Conflict` when the loser is an approval.
//! Approval is driven by [`crate::PublishEngine`], which uses
//! [`WorkflowStateMachine::prepare`] for the status change itself.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fieldrec_ids::{EntityId, UserId};
use tracing::info;

use crate::error::{Result, WorkflowError};
use crate::store::WorkflowStore;
use crate::types::{
    ensure_version_no, now, Comment, TransitionOutcome, VersionRecord, WorkflowAction,
};

/// Trimmed, non-empty note text.
pub(crate) fn note_text(note: Option<&str>) -> Option<String> {
    note.map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

pub struct WorkflowStateMachine {
    store: Arc<dyn WorkflowStore>,
}

impl WorkflowStateMachine {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    /// The record as it looks after `action`, stamped with `actor` and `at`.
    ///
    /// Fails with `InvalidState` if the record is not in the action's source
    /// status. Does not touch storage.
    pub fn prepare(
        record: &VersionRecord,
        action: WorkflowAction,
        actor: &UserId,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<VersionRecord> {
        let expected = action.source_status();
        if record.status != expected {
            return Err(WorkflowError::invalid_state(format!(
                "cannot {} {}: status is {}, expected {}",
                action,
                record.label(),
                record.status,
                expected
            )));
        }

        let note = note_text(note);
        let mut next = record.clone();
        next.status = action.target_status();
        next.updated_at = at;
        match action {
            WorkflowAction::Submit => {
                next.submitted_at = Some(at);
                next.submitted_by = Some(actor.clone());
            }
            WorkflowAction::Approve => {
                next.approved_at = Some(at);
                next.approved_by = Some(actor.clone());
                if note.is_some() {
                    next.review_comments = note;
                }
            }
            WorkflowAction::Reject => {
                next.rejected_at = Some(at);
                next.rejected_by = Some(actor.clone());
                next.rejection_reason = note;
            }
            WorkflowAction::ReturnForRevision => {
                next.returned_at = Some(at);
                next.returned_by = Some(actor.clone());
                next.review_comments = note;
            }
        }
        Ok(next)
    }

    pub async fn submit(
        &self,
        entity_id: &EntityId,
        version_no: u32,
        actor: &UserId,
        note: Option<&str>,
    ) -> Result<TransitionOutcome> {
        self.transition(entity_id, version_no, WorkflowAction::Submit, actor, note)
            .await
    }

    pub async fn reject(
        &self,
        entity_id: &EntityId,
        version_no: u32,
        actor: &UserId,
        reason: Option<&str>,
    ) -> Result<TransitionOutcome> {
        self.transition(entity_id, version_no, WorkflowAction::Reject, actor, reason)
            .await
    }

    pub async fn return_for_revision(
        &self,
        entity_id: &EntityId,
        version_no: u32,
        actor: &UserId,
        comments: Option<&str>,
    ) -> Result<TransitionOutcome> {
        self.transition(
            entity_id,
            version_no,
            WorkflowAction::ReturnForRevision,
            actor,
            comments,
        )
        .await
    }

    async fn transition(
        &self,
        entity_id: &EntityId,
        version_no: u32,
        action: WorkflowAction,
        actor: &UserId,
        note: Option<&str>,
    ) -> Result<TransitionOutcome> {
        ensure_version_no(version_no)?;
        let current = self
            .store
            .get_version(entity_id, version_no)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("{} v{}", entity_id, version_no)))?;

        let at = now();
        let next = Self::prepare(&current, action, actor, note, at)?;
        let comment = note_text(note).map(|text| {
            Comment::new(
                entity_id.clone(),
                version_no,
                action.comment_type(),
                text,
                actor.clone(),
                at,
            )
        });

        if !self
            .store
            .update_version(&next, action.source_status(), comment.as_ref())
            .await?
        {
            return Err(WorkflowError::invalid_state(format!(
                "{} changed while applying {}; nothing written",
                next.label(),
                action
            )));
        }

        info!(
            version = %next.label(),
            action = %action,
            actor = %actor,
            status = %next.status,
            "transition applied"
        );
        Ok(TransitionOutcome {
            entity_id: entity_id.clone(),
            version_no,
            status: next.status,
            actor: actor.clone(),
            timestamp: at,
        })
    }
}
