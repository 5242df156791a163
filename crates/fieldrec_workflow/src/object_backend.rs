//! [`WorkflowStore`] over a flat object store.
//!
//! There are no transactions, so each operation is ordered so that a crash
//! leaves a state the next call or the reconciliation sweep can finish:
//!
//! - Version allocation lists existing version keys, takes `max + 1` and
//!   claims that key with a create-only write. A lost race retries, up to
//!   `allocation.max_attempts` times.
//! - Version documents are never overwritten. A status change or draft edit
//!   claims the next revision key with a create-only write, so of two
//!   writers that read the same revision only one lands.
//! - Approve, reject and return first claim the version's decision key,
//!   create-only, holding the record they are about to write. Whoever holds
//!   it decides the version; everyone else is refused.
//! - Approval then writes the published record, create-only, before the
//!   approved revision, so an existing published record always belongs to
//!   the recorded approval. The comment and aggregate caches follow.

use std::sync::Arc;

use async_trait::async_trait;
use fieldrec_ids::EntityId;
use tracing::{debug, info, warn};

use crate::aggregates::{AggregateSnapshot, ReconcileReport};
use crate::config::{AllocationConfig, DiscoveryConfig, WorkflowConfig};
use crate::discovery::{DiscoveryDocument, DiscoveryIndex};
use crate::error::{Result, StorageError, WorkflowError};
use crate::layout::{parse_revision, parse_version_no, EntityLocation, Layout, MAX_REVISION};
use crate::object_store::{get_json, put_json, put_json_if_absent, ObjectStore};
use crate::publish::published_from_approved;
use crate::reconcile::{AggregateViews, Reconciler};
use crate::store::{ApprovalCommit, ApprovalOutcome, WorkflowStore};
use crate::types::{
    Comment, EntityRegistration, NewVersion, PublishedRecord, VersionRecord, VersionRef,
    VersionStatus,
};

/// Result of claiming a version's decision key.
enum Decision {
    Claimed,
    /// Another call decided first; its record is returned.
    Taken(VersionRecord),
}

pub struct ObjectWorkflowStore {
    objects: Arc<dyn ObjectStore>,
    discovery: Arc<DiscoveryIndex>,
    views: AggregateViews,
    max_attempts: u32,
}

impl ObjectWorkflowStore {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        discovery: DiscoveryConfig,
        allocation: AllocationConfig,
    ) -> Self {
        let discovery = Arc::new(DiscoveryIndex::new(objects.clone(), discovery));
        Self {
            views: AggregateViews::new(objects.clone()),
            objects,
            discovery,
            max_attempts: allocation.max_attempts.max(1),
        }
    }

    pub fn from_config(objects: Arc<dyn ObjectStore>, config: &WorkflowConfig) -> Self {
        Self::new(objects, config.discovery.clone(), config.allocation.clone())
    }

    pub fn discovery(&self) -> &DiscoveryIndex {
        &self.discovery
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.objects.clone(), self.discovery.clone())
    }

    /// The cached aggregate views, which may lag behind the version log.
    pub async fn cached_aggregates(&self) -> Result<AggregateSnapshot> {
        Ok(self.views.read().await?)
    }

    fn layout(&self) -> &Layout {
        self.discovery.layout()
    }

    async fn locate(&self, entity_id: &EntityId) -> Result<EntityLocation> {
        Ok(self.discovery.find_by_id(entity_id).await?.location)
    }

    async fn try_locate(&self, entity_id: &EntityId) -> Result<Option<EntityLocation>> {
        match self.discovery.find_by_id(entity_id).await {
            Ok(resolved) => Ok(Some(resolved.location)),
            Err(WorkflowError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Current revision number and document of a version.
    async fn head(
        &self,
        location: &EntityLocation,
        version_no: u32,
    ) -> Result<Option<(u32, VersionRecord)>> {
        let prefix = self.layout().version_revisions_prefix(location, version_no);
        let keys = self.objects.list(&prefix, None).await?;
        let Some(key) = keys.last() else {
            return Ok(None);
        };
        let revision = parse_revision(key)?;
        let record = get_json(self.objects.as_ref(), key).await?.ok_or_else(|| {
            StorageError::corrupt_record(format!("version document {} vanished while listed", key))
        })?;
        Ok(Some((revision, record)))
    }

    /// Writes `record` as the revision after `revision`. `false` when a
    /// concurrent writer claimed that revision first.
    async fn claim_revision(
        &self,
        location: &EntityLocation,
        record: &VersionRecord,
        revision: u32,
    ) -> Result<bool> {
        if revision >= MAX_REVISION {
            return Err(WorkflowError::conflict(format!(
                "{} has reached {} revisions",
                record.label(),
                MAX_REVISION
            )));
        }
        let key = self
            .layout()
            .version_revision_key(location, record.version_no, revision + 1);
        let claimed = put_json_if_absent(self.objects.as_ref(), &key, record).await?;
        if claimed {
            debug!(key = %key, status = %record.status, "wrote version revision");
        }
        Ok(claimed)
    }

    async fn claim_decision(
        &self,
        location: &EntityLocation,
        record: &VersionRecord,
    ) -> Result<Decision> {
        let key = self.layout().decision_key(location, record.version_no);
        if put_json_if_absent(self.objects.as_ref(), &key, record).await? {
            debug!(version = %record.label(), outcome = %record.status, "claimed decision");
            return Ok(Decision::Claimed);
        }
        let decided: VersionRecord = get_json(self.objects.as_ref(), &key)
            .await?
            .ok_or_else(|| {
                StorageError::corrupt_record(format!(
                    "decision {} vanished after create-only write failed",
                    key
                ))
            })?;
        Ok(Decision::Taken(decided))
    }

    /// Creates the published record unless one exists; returns the stored one.
    async fn ensure_published(
        &self,
        location: &EntityLocation,
        published: &PublishedRecord,
    ) -> Result<PublishedRecord> {
        let key = self.layout().published_key(location, published.version_no);
        if put_json_if_absent(self.objects.as_ref(), &key, published).await? {
            return Ok(published.clone());
        }
        let existing = get_json(self.objects.as_ref(), &key).await?.ok_or_else(|| {
            StorageError::corrupt_record(format!(
                "published record {} vanished after create-only write failed",
                key
            ))
        })?;
        Ok(existing)
    }

    async fn write_comment(&self, location: &EntityLocation, comment: &Comment) -> Result<()> {
        let key = self.layout().comment_key(
            location,
            comment.version_no,
            comment.timestamp,
            &comment.comment_id,
        );
        put_json(self.objects.as_ref(), &key, comment).await?;
        debug!(key = %key, kind = %comment.comment_type, "stored comment");
        Ok(())
    }

    /// Best effort; a failed cache update is left to the reconciliation sweep.
    async fn refresh_aggregates(
        &self,
        version: VersionRef,
        from: Option<VersionStatus>,
        to: VersionStatus,
    ) {
        if let Err(err) = self.views.apply(version, from, to).await {
            warn!("aggregate cache update failed; run reconcile to repair: {}", err);
        }
    }
}

#[async_trait]
impl WorkflowStore for ObjectWorkflowStore {
    async fn register_entity(&self, registration: &EntityRegistration) -> Result<()> {
        self.discovery
            .register(&DiscoveryDocument::from(registration))
            .await?;
        Ok(())
    }

    async fn get_entity(&self, entity_id: &EntityId) -> Result<Option<EntityRegistration>> {
        match self.discovery.find_by_id(entity_id).await {
            Ok(resolved) => Ok(Some(resolved.document.registration())),
            Err(WorkflowError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn insert_version(&self, new: NewVersion) -> Result<VersionRecord> {
        let location = self.locate(&new.entity_id).await?;

        for attempt in 1..=self.max_attempts {
            let existing = self
                .discovery
                .list_versions_for_entity(&location, &new.entity_id)
                .await?;
            let version_no = match existing.first() {
                Some(max) => max.checked_add(1).ok_or_else(|| {
                    WorkflowError::conflict(format!("{} has no version numbers left", new.entity_id))
                })?,
                None => 1,
            };

            let record = VersionRecord::draft(new.clone(), version_no);
            let key = self.layout().version_key(&location, version_no);
            if put_json_if_absent(self.objects.as_ref(), &key, &record).await? {
                debug!(version = %record.label(), attempt, "allocated version");
                self.refresh_aggregates(VersionRef::from(&record), None, VersionStatus::Draft)
                    .await;
                return Ok(record);
            }

            warn!(
                entity_id = %new.entity_id,
                version_no,
                attempt,
                "version number taken by a concurrent writer; retrying"
            );
            tokio::task::yield_now().await;
        }

        Err(WorkflowError::conflict(format!(
            "could not allocate a version number for {} after {} attempts",
            new.entity_id, self.max_attempts
        )))
    }

    async fn get_version(
        &self,
        entity_id: &EntityId,
        version_no: u32,
    ) -> Result<Option<VersionRecord>> {
        let Some(location) = self.try_locate(entity_id).await? else {
            return Ok(None);
        };
        Ok(self
            .head(&location, version_no)
            .await?
            .map(|(_, record)| record))
    }

    async fn list_versions(&self, entity_id: &EntityId) -> Result<Vec<VersionRecord>> {
        let Some(location) = self.try_locate(entity_id).await? else {
            return Ok(Vec::new());
        };
        let heads = self.discovery.version_heads(&location).await?;
        let mut versions = Vec::with_capacity(heads.len());
        for (_, key) in heads {
            if let Some(record) = get_json(self.objects.as_ref(), &key).await? {
                versions.push(record);
            }
        }
        debug!(entity_id = %entity_id, count = versions.len(), "listed versions");
        Ok(versions)
    }

    async fn update_version(
        &self,
        record: &VersionRecord,
        expected: VersionStatus,
        comment: Option<&Comment>,
    ) -> Result<bool> {
        let location = self.locate(&record.entity_id).await?;
        let (revision, current) = self
            .head(&location, record.version_no)
            .await?
            .ok_or_else(|| WorkflowError::not_found(record.label()))?;

        if current.status != expected {
            debug!(
                version = %record.label(),
                expected = %expected,
                actual = %current.status,
                "status changed underneath update"
            );
            return Ok(false);
        }

        let mut holds_decision = false;
        let mut recorded = None;
        if expected == VersionStatus::Submitted && record.status != VersionStatus::Submitted {
            match self.claim_decision(&location, record).await? {
                Decision::Claimed => holds_decision = true,
                // An approval is finished by any caller, from the recorded decision.
                Decision::Taken(decided)
                    if decided.status == VersionStatus::Approved
                        && record.status == VersionStatus::Approved =>
                {
                    recorded = Some(decided)
                }
                Decision::Taken(decided) => {
                    warn!(
                        version = %record.label(),
                        decided = %decided.status,
                        target = %record.status,
                        "version already decided; refusing transition"
                    );
                    return Ok(false);
                }
            }
        }
        let target = recorded.as_ref().unwrap_or(record);

        if target.status == VersionStatus::Approved {
            self.ensure_published(&location, &published_from_approved(target)?)
                .await?;
        }

        // Only the decision holder or a finisher writing the same record can
        // race for a revision out of `submitted`.
        let wrote = self.claim_revision(&location, target, revision).await?;
        if !wrote && !holds_decision {
            debug!(
                version = %record.label(),
                revision = revision + 1,
                "revision claimed by a concurrent writer"
            );
            return Ok(false);
        }

        if let Some(comment) = comment {
            self.write_comment(&location, comment).await?;
        }
        if wrote && target.status != current.status {
            self.refresh_aggregates(VersionRef::from(target), Some(current.status), target.status)
                .await;
        }
        Ok(true)
    }

    async fn get_published(
        &self,
        entity_id: &EntityId,
        version_no: u32,
    ) -> Result<Option<PublishedRecord>> {
        let Some(location) = self.try_locate(entity_id).await? else {
            return Ok(None);
        };
        let key = self.layout().published_key(&location, version_no);
        Ok(get_json(self.objects.as_ref(), &key).await?)
    }

    async fn latest_published(&self, entity_id: &EntityId) -> Result<Option<PublishedRecord>> {
        let Some(location) = self.try_locate(entity_id).await? else {
            return Ok(None);
        };
        let prefix = self.layout().published_prefix(&location);
        let keys = self.objects.list(&prefix, None).await?;
        let mut latest: Option<(u32, &String)> = None;
        for key in &keys {
            let version_no = parse_version_no(key)?;
            if latest.map_or(true, |(best, _)| version_no > best) {
                latest = Some((version_no, key));
            }
        }
        match latest {
            Some((_, key)) => Ok(get_json(self.objects.as_ref(), key).await?),
            None => Ok(None),
        }
    }

    async fn commit_approval(&self, commit: &ApprovalCommit) -> Result<ApprovalOutcome> {
        let version = &commit.version;
        let location = self.locate(&version.entity_id).await?;
        let published_key = self.layout().published_key(&location, version.version_no);

        if let Some(existing) = get_json(self.objects.as_ref(), &published_key).await? {
            info!(version = %version.label(), "version was already published");
            return Ok(ApprovalOutcome::AlreadyPublished(existing));
        }

        let (revision, current) = self
            .head(&location, version.version_no)
            .await?
            .ok_or_else(|| WorkflowError::not_found(version.label()))?;
        if current.status != VersionStatus::Submitted {
            return Err(WorkflowError::conflict(format!(
                "{} is {}; only submitted versions can be approved",
                version.label(),
                current.status
            )));
        }

        match self.claim_decision(&location, version).await? {
            Decision::Claimed => {
                let published = self.ensure_published(&location, &commit.published).await?;
                // Losing this race means a finisher already wrote this decision.
                if self.claim_revision(&location, version, revision).await? {
                    self.refresh_aggregates(
                        VersionRef::from(version),
                        Some(VersionStatus::Submitted),
                        VersionStatus::Approved,
                    )
                    .await;
                }
                if let Some(comment) = &commit.comment {
                    self.write_comment(&location, comment).await?;
                }
                Ok(ApprovalOutcome::Published(published))
            }
            Decision::Taken(decided) if decided.status == VersionStatus::Approved => {
                let published = self
                    .ensure_published(&location, &published_from_approved(&decided)?)
                    .await?;
                if self.claim_revision(&location, &decided, revision).await? {
                    self.refresh_aggregates(
                        VersionRef::from(&decided),
                        Some(VersionStatus::Submitted),
                        VersionStatus::Approved,
                    )
                    .await;
                }
                info!(version = %version.label(), "finished a concurrent approval");
                Ok(ApprovalOutcome::AlreadyPublished(published))
            }
            Decision::Taken(decided) => Err(WorkflowError::conflict(format!(
                "{} was {} by a concurrent review",
                version.label(),
                decided.status
            ))),
        }
    }

    async fn append_comment(&self, comment: &Comment) -> Result<()> {
        let location = self.locate(&comment.entity_id).await?;
        self.write_comment(&location, comment).await
    }

    async fn list_comments(
        &self,
        entity_id: &EntityId,
        version_no: Option<u32>,
    ) -> Result<Vec<Comment>> {
        let Some(location) = self.try_locate(entity_id).await? else {
            return Ok(Vec::new());
        };
        let prefix = match version_no {
            Some(version_no) => self.layout().version_comments_prefix(&location, version_no),
            None => self.layout().comments_prefix(&location),
        };
        let keys = self.objects.list(&prefix, None).await?;
        let mut comments: Vec<Comment> = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(comment) = get_json(self.objects.as_ref(), &key).await? {
                comments.push(comment);
            }
        }
        comments.sort_by_key(|c| c.timestamp);
        Ok(comments)
    }

    async fn reconcile(&self) -> Result<ReconcileReport> {
        self.reconciler().run().await
    }
}
