//! Version allocation and draft editing.

use std::sync::Arc;

use fieldrec_ids::{EntityId, UserId};
use serde_json::Value;
use tracing::info;

use crate::error::{Result, WorkflowError};
use crate::store::WorkflowStore;
use crate::types::{
    ensure_version_no, now, EntityKind, EntityRegistration, NewVersion, VersionRecord,
    VersionStatus,
};
use crate::validation::ValidatorRegistry;

pub struct VersionStore {
    store: Arc<dyn WorkflowStore>,
    validators: Arc<ValidatorRegistry>,
}

impl VersionStore {
    pub fn new(store: Arc<dyn WorkflowStore>, validators: Arc<ValidatorRegistry>) -> Self {
        Self { store, validators }
    }

    async fn registered(&self, entity_id: &EntityId) -> Result<EntityRegistration> {
        self.store
            .get_entity(entity_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("entity {}", entity_id)))
    }

    /// Validates the payload and stores it as the entity's next draft.
    pub async fn create_version(
        &self,
        entity_id: &EntityId,
        kind: EntityKind,
        payload: Value,
        author: &UserId,
    ) -> Result<VersionRecord> {
        let entity = self.registered(entity_id).await?;
        if entity.entity_kind != kind {
            return Err(WorkflowError::validation(format!(
                "{} is a {}, not a {}",
                entity_id, entity.entity_kind, kind
            )));
        }
        self.validators.validate(kind, &payload)?;

        let record = self
            .store
            .insert_version(NewVersion {
                entity_id: entity_id.clone(),
                entity_kind: kind,
                payload,
                based_on: None,
                created_by: author.clone(),
                created_at: now(),
            })
            .await?;
        info!(version = %record.label(), kind = %kind, author = %author, "created version");
        Ok(record)
    }

    pub async fn get_version(&self, entity_id: &EntityId, version_no: u32) -> Result<VersionRecord> {
        ensure_version_no(version_no)?;
        self.store
            .get_version(entity_id, version_no)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("{} v{}", entity_id, version_no)))
    }

    /// Newest first.
    pub async fn list_versions(&self, entity_id: &EntityId) -> Result<Vec<VersionRecord>> {
        self.registered(entity_id).await?;
        self.store.list_versions(entity_id).await
    }

    pub async fn latest_version(&self, entity_id: &EntityId) -> Result<VersionRecord> {
        self.list_versions(entity_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| WorkflowError::not_found(format!("{} has no versions", entity_id)))
    }

    /// Replaces the payload of a draft. Any other status is a `Conflict`.
    pub async fn update_draft(
        &self,
        entity_id: &EntityId,
        version_no: u32,
        payload: Value,
    ) -> Result<VersionRecord> {
        let current = self.get_version(entity_id, version_no).await?;
        if current.status != VersionStatus::Draft {
            return Err(WorkflowError::conflict(format!(
                "{} is {}; only drafts can be edited",
                current.label(),
                current.status
            )));
        }
        self.validators.validate(current.entity_kind, &payload)?;

        let mut updated = current;
        updated.payload = payload;
        updated.updated_at = now();
        if !self
            .store
            .update_version(&updated, VersionStatus::Draft, None)
            .await?
        {
            return Err(WorkflowError::conflict(format!(
                "{} left draft while being edited",
                updated.label()
            )));
        }
        info!(version = %updated.label(), "updated draft");
        Ok(updated)
    }

    /// Starts a new draft from a returned or rejected version.
    ///
    /// The new version records `based_on = from_version` and takes the prior
    /// payload unless one is given.
    pub async fn create_revision(
        &self,
        entity_id: &EntityId,
        from_version: u32,
        payload: Option<Value>,
        author: &UserId,
    ) -> Result<VersionRecord> {
        let prior = self.get_version(entity_id, from_version).await?;
        if !prior.status.allows_revision() {
            return Err(WorkflowError::invalid_state(format!(
                "cannot revise {}: status is {}",
                prior.label(),
                prior.status
            )));
        }
        let payload = payload.unwrap_or_else(|| prior.payload.clone());
        self.validators.validate(prior.entity_kind, &payload)?;

        let record = self
            .store
            .insert_version(NewVersion {
                entity_id: entity_id.clone(),
                entity_kind: prior.entity_kind,
                payload,
                based_on: Some(from_version),
                created_by: author.clone(),
                created_at: now(),
            })
            .await?;
        info!(
            version = %record.label(),
            based_on = from_version,
            author = %author,
            "created revision"
        );
        Ok(record)
    }
}
