//! The storage interface the workflow core is written against.
//!
//! Two adapters implement [`WorkflowStore`]: the SQLite store in
//! `fieldrec_db` and [`crate::ObjectWorkflowStore`] over a flat key/document
//! store. Everything above this trait is backend-agnostic.

use async_trait::async_trait;
use fieldrec_ids::EntityId;

use crate::aggregates::ReconcileReport;
use crate::error::Result;
use crate::types::{
    Comment, EntityRegistration, NewVersion, PublishedRecord, VersionRecord, VersionStatus,
};

/// Everything written when a version is approved.
#[derive(Debug, Clone)]
pub struct ApprovalCommit {
    /// The version, already stamped `approved`.
    pub version: VersionRecord,
    pub published: PublishedRecord,
    pub comment: Option<Comment>,
}

/// How [`WorkflowStore::commit_approval`] resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalOutcome {
    /// This call approved the version.
    Published(PublishedRecord),
    /// Another call approved it first; its published record is returned and
    /// this call's comment was not written.
    AlreadyPublished(PublishedRecord),
}

/// Persistent storage for entities, versions, published records and comments.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Fails with `Conflict` if the ID is already registered.
    async fn register_entity(&self, registration: &EntityRegistration) -> Result<()>;

    async fn get_entity(&self, entity_id: &EntityId) -> Result<Option<EntityRegistration>>;

    /// Allocates the next version number for the entity and stores a draft.
    ///
    /// Numbers are contiguous from 1. Concurrent calls for one entity never
    /// receive the same number; if a unique number cannot be secured the call
    /// fails with `Conflict` and the caller may retry.
    async fn insert_version(&self, new: NewVersion) -> Result<VersionRecord>;

    async fn get_version(
        &self,
        entity_id: &EntityId,
        version_no: u32,
    ) -> Result<Option<VersionRecord>>;

    /// All versions of the entity, newest first.
    async fn list_versions(&self, entity_id: &EntityId) -> Result<Vec<VersionRecord>>;

    /// Replaces the stored version if its current status is `expected`, and
    /// appends `comment` alongside. Returns `false` without writing when the
    /// status no longer matches.
    async fn update_version(
        &self,
        record: &VersionRecord,
        expected: VersionStatus,
        comment: Option<&Comment>,
    ) -> Result<bool>;

    async fn get_published(
        &self,
        entity_id: &EntityId,
        version_no: u32,
    ) -> Result<Option<PublishedRecord>>;

    /// The published record with the highest version number.
    async fn latest_published(&self, entity_id: &EntityId) -> Result<Option<PublishedRecord>>;

    /// Creates the published record and marks the version approved.
    ///
    /// The published record is created at most once per version. When one
    /// already exists the call returns it as
    /// [`ApprovalOutcome::AlreadyPublished`]. A version that is no longer
    /// `submitted`, or that a concurrent reject or return decided first, is a
    /// `Conflict` and nothing is written.
    async fn commit_approval(&self, commit: &ApprovalCommit) -> Result<ApprovalOutcome>;

    async fn append_comment(&self, comment: &Comment) -> Result<()>;

    /// Comments in chronological order, for one version or the whole entity.
    async fn list_comments(
        &self,
        entity_id: &EntityId,
        version_no: Option<u32>,
    ) -> Result<Vec<Comment>>;

    /// Recomputes derived aggregate views and repairs half-finished approvals.
    async fn reconcile(&self) -> Result<ReconcileReport>;
}
