//! Entity discovery over a store that offers only key lookup and prefix
//! listing.
//!
//! Every entity has a metadata document embedding its ID. A lookup first
//! tries the explicit index document `index/entities/{id}.json`; on a miss
//! or a stale entry it scans all metadata documents under the root prefix
//! and compares embedded IDs. The scan is O(entities) and bounded by
//! `max_candidates`; a scan hit rewrites the index document so the next
//! lookup is a point read.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fieldrec_ids::{EntityId, ProjectId, UserId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::error::{Result, WorkflowError};
use crate::layout::{parse_version_no, EntityLocation, Layout};
use crate::object_store::{get_json, put_json, put_json_if_absent, ObjectStore};
use crate::types::{now, EntityKind, EntityRegistration};

/// Per-entity metadata document; the join key for discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub entity_id: EntityId,
    pub entity_kind: EntityKind,
    pub project: ProjectId,
    pub slug: String,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl DiscoveryDocument {
    pub fn location(&self) -> EntityLocation {
        EntityLocation {
            project: self.project.clone(),
            slug: self.slug.clone(),
        }
    }

    pub fn registration(&self) -> EntityRegistration {
        EntityRegistration {
            entity_id: self.entity_id.clone(),
            entity_kind: self.entity_kind,
            project: self.project.clone(),
            created_by: self.created_by.clone(),
            created_at: self.created_at,
        }
    }
}

impl From<&EntityRegistration> for DiscoveryDocument {
    fn from(reg: &EntityRegistration) -> Self {
        let location = EntityLocation::for_entity(reg.project.clone(), &reg.entity_id);
        Self {
            entity_id: reg.entity_id.clone(),
            entity_kind: reg.entity_kind,
            project: location.project,
            slug: location.slug,
            created_by: reg.created_by.clone(),
            created_at: reg.created_at,
        }
    }
}

/// Explicit ID → location pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub entity_id: EntityId,
    pub location: EntityLocation,
    pub metadata_key: String,
    pub indexed_at: DateTime<Utc>,
}

/// A located entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntity {
    pub location: EntityLocation,
    pub document: DiscoveryDocument,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexRebuildReport {
    pub indexed: usize,
    /// IDs embedded in more than one metadata document; left unindexed.
    pub duplicates: Vec<EntityId>,
    /// Metadata documents that could not be parsed.
    pub unreadable: Vec<String>,
}

struct Scan {
    documents: Vec<(String, DiscoveryDocument)>,
    unreadable: Vec<String>,
    truncated: bool,
}

pub struct DiscoveryIndex {
    objects: Arc<dyn ObjectStore>,
    layout: Layout,
    config: DiscoveryConfig,
}

impl DiscoveryIndex {
    pub fn new(objects: Arc<dyn ObjectStore>, config: DiscoveryConfig) -> Self {
        let layout = Layout::new(config.root_prefix.clone(), config.metadata_file.clone());
        Self {
            objects,
            layout,
            config,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Resolves an entity ID to its location.
    ///
    /// Zero matches is `NotFound`, more than one is `Conflict`.
    pub async fn find_by_id(&self, entity_id: &EntityId) -> Result<ResolvedEntity> {
        if self.config.use_index {
            if let Some(resolved) = self.lookup_index(entity_id).await? {
                return Ok(resolved);
            }
        }

        let scan = self.scan(Some(self.config.max_candidates)).await?;
        let mut matches: Vec<(String, DiscoveryDocument)> = scan
            .documents
            .into_iter()
            .filter(|(_, doc)| &doc.entity_id == entity_id)
            .collect();

        match matches.len() {
            0 => {
                if scan.truncated {
                    warn!(
                        entity_id = %entity_id,
                        max_candidates = self.config.max_candidates,
                        "entity not found within scan limit"
                    );
                    return Err(WorkflowError::not_found(format!(
                        "entity {} (scan stopped after {} candidates)",
                        entity_id, self.config.max_candidates
                    )));
                }
                Err(WorkflowError::not_found(format!("entity {}", entity_id)))
            }
            1 => {
                let (metadata_key, document) = matches.remove(0);
                let location = document.location();
                if self.config.use_index {
                    self.write_index(entity_id, &location, &metadata_key).await?;
                    info!(entity_id = %entity_id, key = %metadata_key, "repaired index entry from scan");
                }
                Ok(ResolvedEntity { location, document })
            }
            n => {
                let keys: Vec<&str> = matches.iter().map(|(key, _)| key.as_str()).collect();
                Err(WorkflowError::conflict(format!(
                    "entity {} is claimed by {} metadata documents: {}",
                    entity_id,
                    n,
                    keys.join(", ")
                )))
            }
        }
    }

    /// Writes the metadata document and index entry for a new entity.
    pub async fn register(&self, document: &DiscoveryDocument) -> Result<EntityLocation> {
        match self.find_by_id(&document.entity_id).await {
            Ok(existing) => {
                return Err(WorkflowError::conflict(format!(
                    "entity {} already registered under project {}",
                    document.entity_id, existing.location.project
                )))
            }
            Err(WorkflowError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }

        let location = document.location();
        let metadata_key = self.layout.metadata_key(&location);
        if !put_json_if_absent(self.objects.as_ref(), &metadata_key, document).await? {
            return Err(WorkflowError::conflict(format!(
                "metadata document already exists at {}",
                metadata_key
            )));
        }
        if self.config.use_index {
            self.write_index(&document.entity_id, &location, &metadata_key)
                .await?;
        }

        info!(
            entity_id = %document.entity_id,
            kind = %document.entity_kind,
            project = %location.project,
            "registered entity"
        );
        Ok(location)
    }

    /// Version numbers stored for the entity, highest first.
    pub async fn list_versions_for_entity(
        &self,
        location: &EntityLocation,
        entity_id: &EntityId,
    ) -> Result<Vec<u32>> {
        let prefix = self.layout.versions_prefix(location);
        let keys = self.objects.list(&prefix, None).await?;
        let mut numbers = keys
            .iter()
            .map(|key| parse_version_no(key))
            .collect::<std::result::Result<Vec<u32>, _>>()?;
        // Revisions of one version share its number.
        numbers.sort_unstable();
        numbers.dedup();
        numbers.reverse();
        debug!(entity_id = %entity_id, count = numbers.len(), "listed versions");
        Ok(numbers)
    }

    /// Key of the current revision of every version, highest version first.
    pub async fn version_heads(&self, location: &EntityLocation) -> Result<Vec<(u32, String)>> {
        let prefix = self.layout.versions_prefix(location);
        let keys = self.objects.list(&prefix, None).await?;
        // Keys ascend, so the last key seen for a number is its highest revision.
        let mut heads: BTreeMap<u32, String> = BTreeMap::new();
        for key in keys {
            heads.insert(parse_version_no(&key)?, key);
        }
        Ok(heads.into_iter().rev().collect())
    }

    /// Every entity found by a full, uncapped scan, ordered by key.
    pub async fn all_locations(&self) -> Result<Vec<ResolvedEntity>> {
        let scan = self.scan(None).await?;
        Ok(scan
            .documents
            .into_iter()
            .map(|(_, document)| ResolvedEntity {
                location: document.location(),
                document,
            })
            .collect())
    }

    /// Full scan that rewrites every index document.
    pub async fn rebuild_index(&self) -> Result<IndexRebuildReport> {
        let scan = self.scan(None).await?;
        let mut by_id: BTreeMap<EntityId, Vec<(String, DiscoveryDocument)>> = BTreeMap::new();
        for (key, doc) in scan.documents {
            by_id.entry(doc.entity_id.clone()).or_default().push((key, doc));
        }

        let mut report = IndexRebuildReport {
            unreadable: scan.unreadable,
            ..Default::default()
        };
        for (entity_id, docs) in by_id {
            if docs.len() > 1 {
                warn!(entity_id = %entity_id, count = docs.len(), "duplicate entity ID; not indexed");
                report.duplicates.push(entity_id);
                continue;
            }
            let (key, doc) = &docs[0];
            self.write_index(&entity_id, &doc.location(), key).await?;
            report.indexed += 1;
        }

        info!(
            indexed = report.indexed,
            duplicates = report.duplicates.len(),
            "rebuilt entity index"
        );
        Ok(report)
    }

    async fn lookup_index(&self, entity_id: &EntityId) -> Result<Option<ResolvedEntity>> {
        let index_key = self.layout.index_key(entity_id);
        let Some(index) = get_json::<IndexDocument>(self.objects.as_ref(), &index_key).await? else {
            debug!(entity_id = %entity_id, "no index entry");
            return Ok(None);
        };

        match get_json::<DiscoveryDocument>(self.objects.as_ref(), &index.metadata_key).await {
            Ok(Some(document)) if &document.entity_id == entity_id => Ok(Some(ResolvedEntity {
                location: document.location(),
                document,
            })),
            Ok(_) => {
                warn!(entity_id = %entity_id, key = %index.metadata_key, "stale index entry");
                Ok(None)
            }
            Err(err) => {
                warn!(entity_id = %entity_id, key = %index.metadata_key, "unreadable metadata behind index entry: {}", err);
                Ok(None)
            }
        }
    }

    async fn write_index(
        &self,
        entity_id: &EntityId,
        location: &EntityLocation,
        metadata_key: &str,
    ) -> Result<()> {
        let doc = IndexDocument {
            entity_id: entity_id.clone(),
            location: location.clone(),
            metadata_key: metadata_key.to_string(),
            indexed_at: now(),
        };
        put_json(self.objects.as_ref(), &self.layout.index_key(entity_id), &doc).await?;
        Ok(())
    }

    /// Fetches metadata documents under the root prefix, at most `cap`.
    ///
    /// Keys are listed a page at a time and listing stops once `cap`
    /// candidates have been seen, so the cap bounds list requests as well
    /// as document reads.
    async fn scan(&self, cap: Option<usize>) -> Result<Scan> {
        let page_size = self.config.scan_page_size.max(1);
        let mut candidates: Vec<String> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut truncated = false;
        'pages: loop {
            let page = self
                .objects
                .list_page(self.layout.root_prefix(), cursor.as_deref(), Some(page_size))
                .await?;
            let exhausted = page.len() < page_size;
            cursor = page.last().cloned();
            for key in page {
                if !self.layout.is_metadata_key(&key) {
                    continue;
                }
                if cap.is_some_and(|cap| candidates.len() >= cap) {
                    truncated = true;
                    break 'pages;
                }
                candidates.push(key);
            }
            if exhausted {
                break;
            }
        }

        let mut scan = Scan {
            documents: Vec::with_capacity(candidates.len()),
            unreadable: Vec::new(),
            truncated,
        };
        for key in candidates {
            match get_json::<DiscoveryDocument>(self.objects.as_ref(), &key).await {
                Ok(Some(doc)) => match self.layout.location_from_metadata_key(&key) {
                    Ok(location) if location == doc.location() => scan.documents.push((key, doc)),
                    Ok(location) => {
                        warn!(
                            key = %key,
                            embedded_project = %doc.project,
                            path_project = %location.project,
                            "metadata document does not match its path; skipping"
                        );
                        scan.unreadable.push(key);
                    }
                    Err(err) => {
                        warn!(key = %key, "skipping metadata document at unexpected path: {}", err);
                        scan.unreadable.push(key);
                    }
                },
                Ok(None) => {}
                Err(err) => {
                    warn!(key = %key, "skipping unreadable metadata document: {}", err);
                    scan.unreadable.push(key);
                }
            }
        }
        debug!(
            documents = scan.documents.len(),
            truncated = scan.truncated,
            "scanned metadata documents"
        );
        Ok(scan)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::StorageError;
    use crate::object_store::MemoryObjectStore;

    fn document(id: &str, project: &str) -> DiscoveryDocument {
        let reg = EntityRegistration {
            entity_id: EntityId::new(id).unwrap(),
            entity_kind: EntityKind::BoreholeLog,
            project: ProjectId::new(project).unwrap(),
            created_by: UserId::new("u1").unwrap(),
            created_at: now(),
        };
        DiscoveryDocument::from(&reg)
    }

    fn index(objects: Arc<MemoryObjectStore>) -> DiscoveryIndex {
        DiscoveryIndex::new(objects, DiscoveryConfig::default())
    }

    #[tokio::test]
    async fn test_register_then_find_via_index() {
        let objects = Arc::new(MemoryObjectStore::new());
        let discovery = index(objects.clone());
        discovery.register(&document("b1", "site-7")).await.unwrap();

        assert!(objects.get("index/entities/b1.json").await.unwrap().is_some());
        let found = discovery
            .find_by_id(&EntityId::new("b1").unwrap())
            .await
            .unwrap();
        assert_eq!(found.location.project.as_str(), "site-7");
        assert_eq!(found.location.slug, "b1");
    }

    #[tokio::test]
    async fn test_scan_finds_unindexed_entity_and_repairs_index() {
        let objects = Arc::new(MemoryObjectStore::new());
        let discovery = index(objects.clone());
        let doc = document("b1", "site-7");
        put_json(
            objects.as_ref(),
            &discovery.layout().metadata_key(&doc.location()),
            &doc,
        )
        .await
        .unwrap();
        assert!(objects.get("index/entities/b1.json").await.unwrap().is_none());

        let found = discovery
            .find_by_id(&EntityId::new("b1").unwrap())
            .await
            .unwrap();
        assert_eq!(found.document, doc);
        assert!(objects.get("index/entities/b1.json").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let discovery = index(Arc::new(MemoryObjectStore::new()));
        let err = discovery
            .find_by_id(&EntityId::new("ghost").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_ids_conflict() {
        let objects = Arc::new(MemoryObjectStore::new());
        let discovery = index(objects.clone());
        for project in ["site-1", "site-2"] {
            let doc = document("b1", project);
            put_json(
                objects.as_ref(),
                &discovery.layout().metadata_key(&doc.location()),
                &doc,
            )
            .await
            .unwrap();
        }
        let err = discovery
            .find_by_id(&EntityId::new("b1").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Conflict(_)));

        let report = discovery.rebuild_index().await.unwrap();
        assert_eq!(report.indexed, 0);
        assert_eq!(report.duplicates, vec![EntityId::new("b1").unwrap()]);
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_id() {
        let discovery = index(Arc::new(MemoryObjectStore::new()));
        discovery.register(&document("b1", "site-1")).await.unwrap();
        let err = discovery
            .register(&document("b1", "site-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_stale_index_entry_falls_back_to_scan() {
        let objects = Arc::new(MemoryObjectStore::new());
        let discovery = index(objects.clone());
        let doc = document("b1", "site-7");
        discovery.register(&doc).await.unwrap();

        // Point the index somewhere that no longer holds b1.
        let stale = IndexDocument {
            entity_id: doc.entity_id.clone(),
            location: EntityLocation::for_entity(ProjectId::new("gone").unwrap(), &doc.entity_id),
            metadata_key: "projects/gone/entities/b1/metadata.json".to_string(),
            indexed_at: now(),
        };
        put_json(objects.as_ref(), "index/entities/b1.json", &stale)
            .await
            .unwrap();

        let found = discovery.find_by_id(&doc.entity_id).await.unwrap();
        assert_eq!(found.location.project.as_str(), "site-7");
        let repaired: IndexDocument = get_json(objects.as_ref(), "index/entities/b1.json")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(repaired.location.project.as_str(), "site-7");
    }

    #[tokio::test]
    async fn test_scan_respects_max_candidates() {
        let objects = Arc::new(MemoryObjectStore::new());
        let config = DiscoveryConfig {
            max_candidates: 2,
            use_index: false,
            ..Default::default()
        };
        let discovery = DiscoveryIndex::new(objects.clone(), config);
        for id in ["a1", "a2", "a3"] {
            discovery.register(&document(id, "p")).await.unwrap();
        }
        // a3 sorts after the first two candidates.
        let err = discovery
            .find_by_id(&EntityId::new("a3").unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("scan stopped"));
        assert_eq!(discovery.all_locations().await.unwrap().len(), 3);
    }

    /// Counts the keys handed out by list calls.
    struct CountingStore {
        inner: MemoryObjectStore,
        listed: AtomicUsize,
    }

    #[async_trait]
    impl ObjectStore for CountingStore {
        async fn get(&self, key: &str) -> std::result::Result<Option<Vec<u8>>, StorageError> {
            self.inner.get(key).await
        }
        async fn put(&self, key: &str, bytes: Vec<u8>) -> std::result::Result<(), StorageError> {
            self.inner.put(key, bytes).await
        }
        async fn put_if_absent(
            &self,
            key: &str,
            bytes: Vec<u8>,
        ) -> std::result::Result<bool, StorageError> {
            self.inner.put_if_absent(key, bytes).await
        }
        async fn list_page(
            &self,
            prefix: &str,
            start_after: Option<&str>,
            limit: Option<usize>,
        ) -> std::result::Result<Vec<String>, StorageError> {
            let keys = self.inner.list_page(prefix, start_after, limit).await?;
            self.listed.fetch_add(keys.len(), Ordering::SeqCst);
            Ok(keys)
        }
    }

    #[tokio::test]
    async fn test_capped_scan_stops_listing_early() {
        let objects = Arc::new(CountingStore {
            inner: MemoryObjectStore::new(),
            listed: AtomicUsize::new(0),
        });
        let config = DiscoveryConfig {
            max_candidates: 2,
            scan_page_size: 4,
            use_index: false,
            ..Default::default()
        };
        let discovery = DiscoveryIndex::new(objects.clone(), config);
        for id in ["a1", "a2", "a3", "a4", "a5"] {
            let doc = document(id, "p");
            discovery.register(&doc).await.unwrap();
            for n in 0..3 {
                let key = format!(
                    "{}comments/0000000001/{:013}-c.json",
                    discovery.layout().entity_prefix(&doc.location()),
                    n
                );
                objects.put(&key, b"{}".to_vec()).await.unwrap();
            }
        }
        objects.listed.store(0, Ordering::SeqCst);

        let found = discovery
            .find_by_id(&EntityId::new("a1").unwrap())
            .await
            .unwrap();
        assert_eq!(found.location.slug, "a1");
        // Listing stops at the third metadata key, well short of all 20.
        assert_eq!(objects.listed.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn test_scan_skips_document_stored_under_another_path() {
        let objects = Arc::new(MemoryObjectStore::new());
        let discovery = index(objects.clone());
        let doc = document("b1", "site-7");
        put_json(
            objects.as_ref(),
            "projects/site-9/entities/b1/metadata.json",
            &doc,
        )
        .await
        .unwrap();

        let err = discovery.find_by_id(&doc.entity_id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
        let report = discovery.rebuild_index().await.unwrap();
        assert_eq!(report.indexed, 0);
        assert_eq!(
            report.unreadable,
            vec!["projects/site-9/entities/b1/metadata.json".to_string()]
        );
    }

    #[tokio::test]
    async fn test_list_versions_descending() {
        let objects = Arc::new(MemoryObjectStore::new());
        let discovery = index(objects.clone());
        let doc = document("b1", "p");
        let loc = discovery.register(&doc).await.unwrap();
        for v in [2u32, 10, 1] {
            objects
                .put(&discovery.layout().version_key(&loc, v), b"{}".to_vec())
                .await
                .unwrap();
        }
        objects
            .put(&discovery.layout().version_revision_key(&loc, 2, 1), b"{}".to_vec())
            .await
            .unwrap();
        let numbers = discovery
            .list_versions_for_entity(&loc, &doc.entity_id)
            .await
            .unwrap();
        assert_eq!(numbers, vec![10, 2, 1]);

        let heads = discovery.version_heads(&loc).await.unwrap();
        assert_eq!(heads.len(), 3);
        assert_eq!(heads[1], (2, discovery.layout().version_revision_key(&loc, 2, 1)));
    }
}
