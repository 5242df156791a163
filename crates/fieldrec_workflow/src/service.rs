//! The workflow API: every write resolves the caller through the
//! [`AccessGate`] first and checks the role the operation needs.

use std::sync::Arc;

use fieldrec_ids::{EntityId, ProjectId};
use serde_json::Value;
use tracing::info;

use crate::access::{AccessGate, Credential, Principal, Role};
use crate::aggregates::ReconcileReport;
use crate::comments::{CommentLog, VersionComments};
use crate::error::{Result, WorkflowError};
use crate::publish::PublishEngine;
use crate::state_machine::WorkflowStateMachine;
use crate::store::WorkflowStore;
use crate::types::{
    ensure_version_no, now, Comment, CommentType, EntityKind, EntityRegistration,
    PublishedRecord, TransitionOutcome, VersionRecord, VersionStatus,
};
use crate::validation::ValidatorRegistry;
use crate::version_store::VersionStore;

pub struct WorkflowService {
    store: Arc<dyn WorkflowStore>,
    gate: Arc<dyn AccessGate>,
    versions: VersionStore,
    machine: WorkflowStateMachine,
    publisher: PublishEngine,
    comments: CommentLog,
}

impl WorkflowService {
    pub fn new(store: Arc<dyn WorkflowStore>, gate: Arc<dyn AccessGate>) -> Self {
        Self::with_validators(store, gate, ValidatorRegistry::default())
    }

    pub fn with_validators(
        store: Arc<dyn WorkflowStore>,
        gate: Arc<dyn AccessGate>,
        validators: ValidatorRegistry,
    ) -> Self {
        let validators = Arc::new(validators);
        Self {
            versions: VersionStore::new(store.clone(), validators),
            machine: WorkflowStateMachine::new(store.clone()),
            publisher: PublishEngine::new(store.clone()),
            comments: CommentLog::new(store.clone()),
            store,
            gate,
        }
    }

    /// Resolves the caller and checks that it holds `role`.
    pub async fn authorize(&self, credential: &Credential, role: Role) -> Result<Principal> {
        let principal = self.gate.resolve(credential).await?;
        principal.require(role)?;
        Ok(principal)
    }

    // ------------------------------------------------------------------
    // Authoring
    // ------------------------------------------------------------------

    pub async fn register_entity(
        &self,
        credential: &Credential,
        entity_id: EntityId,
        kind: EntityKind,
        project: ProjectId,
    ) -> Result<EntityRegistration> {
        let principal = self.authorize(credential, Role::Author).await?;
        let registration = EntityRegistration {
            entity_id,
            entity_kind: kind,
            project,
            created_by: principal.user_id,
            created_at: now(),
        };
        self.store.register_entity(&registration).await?;
        info!(
            entity_id = %registration.entity_id,
            kind = %kind,
            project = %registration.project,
            "entity registered"
        );
        Ok(registration)
    }

    pub async fn find_entity(&self, entity_id: &EntityId) -> Result<EntityRegistration> {
        self.store
            .get_entity(entity_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("entity {}", entity_id)))
    }

    pub async fn create_version(
        &self,
        credential: &Credential,
        entity_id: &EntityId,
        kind: EntityKind,
        payload: Value,
    ) -> Result<VersionRecord> {
        let principal = self.authorize(credential, Role::Author).await?;
        self.versions
            .create_version(entity_id, kind, payload, &principal.user_id)
            .await
    }

    pub async fn update_draft(
        &self,
        credential: &Credential,
        entity_id: &EntityId,
        version_no: u32,
        payload: Value,
    ) -> Result<VersionRecord> {
        self.authorize(credential, Role::Author).await?;
        self.versions.update_draft(entity_id, version_no, payload).await
    }

    pub async fn create_revision(
        &self,
        credential: &Credential,
        entity_id: &EntityId,
        from_version: u32,
        payload: Option<Value>,
    ) -> Result<VersionRecord> {
        let principal = self.authorize(credential, Role::Author).await?;
        self.versions
            .create_revision(entity_id, from_version, payload, &principal.user_id)
            .await
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    pub async fn submit(
        &self,
        credential: &Credential,
        entity_id: &EntityId,
        version_no: u32,
        note: Option<&str>,
    ) -> Result<TransitionOutcome> {
        let principal = self.authorize(credential, Role::Author).await?;
        self.machine
            .submit(entity_id, version_no, &principal.user_id, note)
            .await
    }

    pub async fn approve(
        &self,
        credential: &Credential,
        entity_id: &EntityId,
        version_no: u32,
        comments: Option<&str>,
    ) -> Result<TransitionOutcome> {
        let principal = self.authorize(credential, Role::Approver).await?;
        let published = self
            .publisher
            .approve(entity_id, version_no, &principal.user_id, comments)
            .await?;
        Ok(TransitionOutcome {
            entity_id: published.entity_id,
            version_no: published.version_no,
            status: VersionStatus::Approved,
            actor: published.approved_by,
            timestamp: published.published_at,
        })
    }

    pub async fn reject(
        &self,
        credential: &Credential,
        entity_id: &EntityId,
        version_no: u32,
        reason: Option<&str>,
    ) -> Result<TransitionOutcome> {
        let principal = self.authorize(credential, Role::Approver).await?;
        self.machine
            .reject(entity_id, version_no, &principal.user_id, reason)
            .await
    }

    pub async fn return_for_revision(
        &self,
        credential: &Credential,
        entity_id: &EntityId,
        version_no: u32,
        comments: Option<&str>,
    ) -> Result<TransitionOutcome> {
        let principal = self.authorize(credential, Role::Approver).await?;
        self.machine
            .return_for_revision(entity_id, version_no, &principal.user_id, comments)
            .await
    }

    /// A free-standing review comment; any authenticated caller.
    pub async fn add_comment(
        &self,
        credential: &Credential,
        entity_id: &EntityId,
        version_no: u32,
        comment_type: CommentType,
        text: &str,
    ) -> Result<Comment> {
        let principal = self.gate.resolve(credential).await?;
        self.comments
            .append_comment(entity_id, version_no, comment_type, text, &principal.user_id)
            .await
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn get_version(&self, entity_id: &EntityId, version_no: u32) -> Result<VersionRecord> {
        self.versions.get_version(entity_id, version_no).await
    }

    pub async fn list_versions(&self, entity_id: &EntityId) -> Result<Vec<VersionRecord>> {
        self.versions.list_versions(entity_id).await
    }

    /// The highest-numbered version, whatever its status.
    pub async fn latest_version(&self, entity_id: &EntityId) -> Result<VersionRecord> {
        self.versions.latest_version(entity_id).await
    }

    pub async fn get_latest_published(&self, entity_id: &EntityId) -> Result<PublishedRecord> {
        self.store
            .latest_published(entity_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("no published record for {}", entity_id)))
    }

    pub async fn get_published(
        &self,
        entity_id: &EntityId,
        version_no: u32,
    ) -> Result<PublishedRecord> {
        ensure_version_no(version_no)?;
        self.store
            .get_published(entity_id, version_no)
            .await?
            .ok_or_else(|| {
                WorkflowError::not_found(format!(
                    "no published record for {} v{}",
                    entity_id, version_no
                ))
            })
    }

    pub async fn list_comments(&self, entity_id: &EntityId, version_no: u32) -> Result<Vec<Comment>> {
        self.comments.list_comments(entity_id, version_no).await
    }

    pub async fn history(&self, entity_id: &EntityId) -> Result<Vec<VersionComments>> {
        self.comments.history(entity_id).await
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    pub async fn reconcile(&self, credential: &Credential) -> Result<ReconcileReport> {
        self.authorize(credential, Role::Admin).await?;
        self.store.reconcile().await
    }
}
