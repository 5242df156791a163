//! Append-only review comments.

use std::collections::BTreeMap;
use std::sync::Arc;

use fieldrec_ids::{EntityId, UserId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, WorkflowError};
use crate::store::WorkflowStore;
use crate::types::{ensure_version_no, now, Comment, CommentType, VersionStatus};

/// Comments of one version, shown alongside its status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionComments {
    pub version_no: u32,
    pub status: VersionStatus,
    pub comments: Vec<Comment>,
}

pub struct CommentLog {
    store: Arc<dyn WorkflowStore>,
}

impl CommentLog {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    pub async fn append_comment(
        &self,
        entity_id: &EntityId,
        version_no: u32,
        comment_type: CommentType,
        text: &str,
        author: &UserId,
    ) -> Result<Comment> {
        ensure_version_no(version_no)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(WorkflowError::validation("comment text must not be empty"));
        }
        if self.store.get_version(entity_id, version_no).await?.is_none() {
            return Err(WorkflowError::not_found(format!("{} v{}", entity_id, version_no)));
        }

        let comment = Comment::new(
            entity_id.clone(),
            version_no,
            comment_type,
            text,
            author.clone(),
            now(),
        );
        self.store.append_comment(&comment).await?;
        debug!(entity_id = %entity_id, version_no, kind = %comment_type, "appended comment");
        Ok(comment)
    }

    /// Chronological.
    pub async fn list_comments(&self, entity_id: &EntityId, version_no: u32) -> Result<Vec<Comment>> {
        ensure_version_no(version_no)?;
        self.store.list_comments(entity_id, Some(version_no)).await
    }

    /// Every version of the entity, newest first, each with its comments.
    pub async fn history(&self, entity_id: &EntityId) -> Result<Vec<VersionComments>> {
        if self.store.get_entity(entity_id).await?.is_none() {
            return Err(WorkflowError::not_found(format!("entity {}", entity_id)));
        }
        let versions = self.store.list_versions(entity_id).await?;
        let mut by_version: BTreeMap<u32, Vec<Comment>> = BTreeMap::new();
        for comment in self.store.list_comments(entity_id, None).await? {
            by_version.entry(comment.version_no).or_default().push(comment);
        }

        Ok(versions
            .into_iter()
            .map(|version| VersionComments {
                version_no: version.version_no,
                status: version.status,
                comments: by_version.remove(&version.version_no).unwrap_or_default(),
            })
            .collect())
    }
}
