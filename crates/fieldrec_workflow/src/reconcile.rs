//! Aggregate caches of the object-store backend and the sweep that rebuilds
//! them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregates::{AggregateSnapshot, ReconcileReport, StatusCounters};
use crate::discovery::DiscoveryIndex;
use crate::error::{Result, StorageError};
use crate::layout::{
    parse_revision, EntityLocation, AGGREGATE_APPROVED_KEY, AGGREGATE_COUNTERS_KEY,
    AGGREGATE_SUBMITTED_KEY, MAX_REVISION,
};
use crate::object_store::{get_json, put_json, put_json_if_absent, ObjectStore};
use crate::publish::published_from_approved;
use crate::types::{VersionRecord, VersionRef, VersionStatus};

#[derive(Debug, Serialize, Deserialize)]
struct VersionListDocument {
    computed_at: DateTime<Utc>,
    versions: Vec<VersionRef>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CountersDocument {
    computed_at: DateTime<Utc>,
    counters: StatusCounters,
}

/// Reads and writes `aggregates/{approved,submitted,counters}.json`.
///
/// Incremental updates are read-modify-write and lose races; the
/// [`Reconciler`] restores exact values.
#[derive(Clone)]
pub struct AggregateViews {
    objects: Arc<dyn ObjectStore>,
}

impl AggregateViews {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects }
    }

    /// The cached snapshot; missing documents read as empty.
    pub async fn read(&self) -> std::result::Result<AggregateSnapshot, StorageError> {
        let store = self.objects.as_ref();
        let approved: Option<VersionListDocument> = get_json(store, AGGREGATE_APPROVED_KEY).await?;
        let submitted: Option<VersionListDocument> =
            get_json(store, AGGREGATE_SUBMITTED_KEY).await?;
        let counters: Option<CountersDocument> = get_json(store, AGGREGATE_COUNTERS_KEY).await?;

        let mut snapshot = AggregateSnapshot::empty();
        if let Some(doc) = counters {
            snapshot.computed_at = doc.computed_at;
            snapshot.counters = doc.counters;
        }
        if let Some(doc) = approved {
            snapshot.approved = doc.versions;
        }
        if let Some(doc) = submitted {
            snapshot.submitted = doc.versions;
        }
        Ok(snapshot)
    }

    pub async fn write(&self, snapshot: &AggregateSnapshot) -> std::result::Result<(), StorageError> {
        let store = self.objects.as_ref();
        put_json(
            store,
            AGGREGATE_APPROVED_KEY,
            &VersionListDocument {
                computed_at: snapshot.computed_at,
                versions: snapshot.approved.clone(),
            },
        )
        .await?;
        put_json(
            store,
            AGGREGATE_SUBMITTED_KEY,
            &VersionListDocument {
                computed_at: snapshot.computed_at,
                versions: snapshot.submitted.clone(),
            },
        )
        .await?;
        put_json(
            store,
            AGGREGATE_COUNTERS_KEY,
            &CountersDocument {
                computed_at: snapshot.computed_at,
                counters: snapshot.counters.clone(),
            },
        )
        .await
    }

    pub async fn apply(
        &self,
        version: VersionRef,
        from: Option<VersionStatus>,
        to: VersionStatus,
    ) -> std::result::Result<(), StorageError> {
        let mut snapshot = self.read().await?;
        snapshot.apply(version, from, to);
        self.write(&snapshot).await
    }
}

/// Rescans every entity's version documents, finishes review decisions that
/// were recorded but never applied, and rewrites the aggregate documents.
/// Safe to run at any time and repeatedly.
///
/// Only a version still `submitted` with a decision on record is touched.
/// The decision is written as the next revision, and for an approval the
/// published record is created first if it is missing.
pub struct Reconciler {
    objects: Arc<dyn ObjectStore>,
    discovery: Arc<DiscoveryIndex>,
    views: AggregateViews,
}

impl Reconciler {
    pub fn new(objects: Arc<dyn ObjectStore>, discovery: Arc<DiscoveryIndex>) -> Self {
        let views = AggregateViews::new(objects.clone());
        Self {
            objects,
            discovery,
            views,
        }
    }

    pub async fn run(&self) -> Result<ReconcileReport> {
        let store = self.objects.as_ref();
        let entities = self.discovery.all_locations().await?;

        let mut versions = Vec::new();
        let mut repaired = Vec::new();
        for entity in &entities {
            for (_, key) in self.discovery.version_heads(&entity.location).await? {
                let Some(mut version) = get_json::<VersionRecord>(store, &key).await? else {
                    continue;
                };
                if version.status == VersionStatus::Submitted {
                    if let Some(decided) =
                        self.finish_decision(&entity.location, &version, &key).await?
                    {
                        repaired.push(VersionRef::from(&decided));
                        version = decided;
                    }
                }
                versions.push(version);
            }
        }

        let snapshot = AggregateSnapshot::from_versions(&versions);
        self.views.write(&snapshot).await?;

        info!(
            entities = entities.len(),
            versions = versions.len(),
            repaired = repaired.len(),
            "reconciliation complete"
        );
        Ok(ReconcileReport {
            entities_scanned: entities.len(),
            versions_scanned: versions.len(),
            repaired,
            snapshot,
        })
    }

    /// Applies the decision recorded for `version`, a submitted version whose
    /// current document is `head_key`. Returns the record when this sweep
    /// wrote it.
    async fn finish_decision(
        &self,
        location: &EntityLocation,
        version: &VersionRecord,
        head_key: &str,
    ) -> Result<Option<VersionRecord>> {
        let store = self.objects.as_ref();
        let layout = self.discovery.layout();
        let decision_key = layout.decision_key(location, version.version_no);
        let Some(decided) = get_json::<VersionRecord>(store, &decision_key).await? else {
            return Ok(None);
        };
        let revision = parse_revision(head_key)?;
        if revision >= MAX_REVISION {
            warn!(version = %decided.label(), "no revision left to apply decision");
            return Ok(None);
        }

        warn!(
            version = %decided.label(),
            outcome = %decided.status,
            "review decision was never applied; finishing"
        );
        if decided.status == VersionStatus::Approved {
            let published = published_from_approved(&decided)?;
            let published_key = layout.published_key(location, decided.version_no);
            put_json_if_absent(store, &published_key, &published).await?;
        }
        let next_key = layout.version_revision_key(location, decided.version_no, revision + 1);
        if put_json_if_absent(store, &next_key, &decided).await? {
            Ok(Some(decided))
        } else {
            Ok(None)
        }
    }
}
