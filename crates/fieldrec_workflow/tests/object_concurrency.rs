//! Concurrent allocation, racing transitions, retried approval and crash
//! recovery on the object-store backend.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fieldrec_ids::{EntityId, ProjectId, UserId};
use fieldrec_workflow::config::{AllocationConfig, DiscoveryConfig};
use fieldrec_workflow::{
    now, CommentType, EntityKind, EntityRegistration, FsObjectStore, MemoryObjectStore,
    NewVersion, ObjectStore, ObjectWorkflowStore, PublishEngine, StorageError,
    ValidatorRegistry, VersionStatus, VersionStore, WorkflowError, WorkflowStateMachine,
    WorkflowStore,
};
use serde_json::json;
use tempfile::TempDir;

/// Fails writes of version documents while armed.
struct FaultyObjectStore {
    inner: MemoryObjectStore,
    fail_version_puts: AtomicBool,
}

impl FaultyObjectStore {
    fn new() -> Self {
        Self {
            inner: MemoryObjectStore::new(),
            fail_version_puts: AtomicBool::new(false),
        }
    }

    fn arm(&self, armed: bool) {
        self.fail_version_puts.store(armed, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for FaultyObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        if self.fail_version_puts.load(Ordering::SeqCst) && key.contains("/versions/") {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        self.inner.put(key, bytes).await
    }

    async fn put_if_absent(&self, key: &str, bytes: Vec<u8>) -> Result<bool, StorageError> {
        if self.fail_version_puts.load(Ordering::SeqCst) && key.contains("/versions/") {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        self.inner.put_if_absent(key, bytes).await
    }

    async fn list_page(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<String>, StorageError> {
        self.inner.list_page(prefix, start_after, limit).await
    }
}

/// Holds every write of a version or decision document for a moment, so two
/// transitions started together both read the same state before writing.
struct SlowWrites {
    inner: MemoryObjectStore,
    delay: AtomicBool,
}

impl SlowWrites {
    fn new() -> Self {
        Self {
            inner: MemoryObjectStore::new(),
            delay: AtomicBool::new(false),
        }
    }

    async fn pause(&self, key: &str) {
        if self.delay.load(Ordering::SeqCst)
            && (key.contains("/versions/") || key.contains("/decisions/"))
        {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[async_trait]
impl ObjectStore for SlowWrites {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.pause(key).await;
        self.inner.put(key, bytes).await
    }

    async fn put_if_absent(&self, key: &str, bytes: Vec<u8>) -> Result<bool, StorageError> {
        self.pause(key).await;
        self.inner.put_if_absent(key, bytes).await
    }

    async fn list_page(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<String>, StorageError> {
        self.inner.list_page(prefix, start_after, limit).await
    }
}

fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

fn b1() -> EntityId {
    EntityId::new("b1").unwrap()
}

fn object_store(objects: Arc<dyn ObjectStore>) -> Arc<ObjectWorkflowStore> {
    Arc::new(ObjectWorkflowStore::new(
        objects,
        DiscoveryConfig::default(),
        AllocationConfig::default(),
    ))
}

async fn register(store: &dyn WorkflowStore, id: &EntityId) {
    store
        .register_entity(&EntityRegistration {
            entity_id: id.clone(),
            entity_kind: EntityKind::BoreholeLog,
            project: ProjectId::new("site-7").unwrap(),
            created_by: user("field-eng"),
            created_at: now(),
        })
        .await
        .unwrap();
}

fn new_version(id: &EntityId, depth: f64) -> NewVersion {
    NewVersion {
        entity_id: id.clone(),
        entity_kind: EntityKind::BoreholeLog,
        payload: json!({"total_depth": depth}),
        based_on: None,
        created_by: user("field-eng"),
        created_at: now(),
    }
}

async fn parallel_creates(store: Arc<ObjectWorkflowStore>, writers: usize) -> Vec<u32> {
    let mut handles = Vec::new();
    for i in 0..writers {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .insert_version(new_version(&b1(), 1.0 + i as f64))
                .await
                .map(|v| v.version_no)
        }));
    }
    let mut numbers = Vec::new();
    for handle in handles {
        numbers.push(handle.await.unwrap().unwrap());
    }
    numbers.sort_unstable();
    numbers
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_parallel_creates_from_zero() {
    let store = object_store(Arc::new(MemoryObjectStore::new()));
    register(store.as_ref(), &b1()).await;
    assert_eq!(parallel_creates(store, 2).await, vec![1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_creates_are_gap_free_on_filesystem() {
    let tmp = TempDir::new().unwrap();
    let store = object_store(Arc::new(FsObjectStore::new(tmp.path()).unwrap()));
    register(store.as_ref(), &b1()).await;
    assert_eq!(parallel_creates(store.clone(), 4).await, vec![1, 2, 3, 4]);

    let listed: Vec<u32> = store
        .list_versions(&b1())
        .await
        .unwrap()
        .iter()
        .map(|v| v.version_no)
        .collect();
    assert_eq!(listed, vec![4, 3, 2, 1]);
}

#[tokio::test]
async fn test_allocation_gives_up_with_conflict() {
    // Claim the key allocation will pick next behind the lister's back by
    // using a store whose listing never shows version documents.
    struct BlindListing(MemoryObjectStore);

    #[async_trait]
    impl ObjectStore for BlindListing {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            self.0.get(key).await
        }
        async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
            self.0.put(key, bytes).await
        }
        async fn put_if_absent(&self, key: &str, bytes: Vec<u8>) -> Result<bool, StorageError> {
            self.0.put_if_absent(key, bytes).await
        }
        async fn list_page(
            &self,
            prefix: &str,
            start_after: Option<&str>,
            limit: Option<usize>,
        ) -> Result<Vec<String>, StorageError> {
            let keys = self.0.list_page(prefix, start_after, limit).await?;
            Ok(keys.into_iter().filter(|k| !k.contains("/versions/")).collect())
        }
    }

    let store = ObjectWorkflowStore::new(
        Arc::new(BlindListing(MemoryObjectStore::new())),
        DiscoveryConfig::default(),
        AllocationConfig { max_attempts: 3 },
    );
    register(&store, &b1()).await;
    store.insert_version(new_version(&b1(), 1.0)).await.unwrap();

    let err = store
        .insert_version(new_version(&b1(), 2.0))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)), "{:?}", err);
}

async fn submitted_b1(store: Arc<ObjectWorkflowStore>) {
    register(store.as_ref(), &b1()).await;
    store.insert_version(new_version(&b1(), 7.0)).await.unwrap();
    WorkflowStateMachine::new(store)
        .submit(&b1(), 1, &user("field-eng"), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_approve_twice_returns_same_record() {
    let store = object_store(Arc::new(MemoryObjectStore::new()));
    submitted_b1(store.clone()).await;
    let engine = PublishEngine::new(store.clone());

    let first = engine.approve(&b1(), 1, &user("u1"), Some("ok")).await.unwrap();
    let second = engine.approve(&b1(), 1, &user("u2"), Some("again")).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(second.approved_by.as_str(), "u1");

    let published = store
        .objects()
        .list("projects/site-7/entities/b1/published/", None)
        .await
        .unwrap();
    assert_eq!(published.len(), 1);

    let approvals = store
        .list_comments(&b1(), Some(1))
        .await
        .unwrap()
        .into_iter()
        .filter(|c| c.comment_type == CommentType::Approval)
        .count();
    assert_eq!(approvals, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_approvals_publish_once() {
    let store = object_store(Arc::new(MemoryObjectStore::new()));
    submitted_b1(store.clone()).await;

    let mut handles = Vec::new();
    for approver in ["u1", "u2", "u3"] {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            PublishEngine::new(store)
                .approve(&b1(), 1, &user(approver), None)
                .await
        }));
    }
    let mut records = Vec::new();
    for handle in handles {
        records.push(handle.await.unwrap().unwrap());
    }
    assert!(records.windows(2).all(|pair| pair[0] == pair[1]));

    let version = store.get_version(&b1(), 1).await.unwrap().unwrap();
    assert_eq!(version.status, VersionStatus::Approved);
    assert_eq!(version.approved_by, Some(records[0].approved_by.clone()));
}

#[tokio::test]
async fn test_retry_after_crash_between_publish_and_version_write() {
    let faulty = Arc::new(FaultyObjectStore::new());
    let store = object_store(faulty.clone());
    submitted_b1(store.clone()).await;
    let engine = PublishEngine::new(store.clone());

    faulty.arm(true);
    let err = engine
        .approve(&b1(), 1, &user("u1"), Some("ok"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Storage(_)));

    // The decision and published record landed; the version did not move.
    let published = store.get_published(&b1(), 1).await.unwrap().unwrap();
    let version = store.get_version(&b1(), 1).await.unwrap().unwrap();
    assert_eq!(version.status, VersionStatus::Submitted);

    faulty.arm(false);
    let retried = engine
        .approve(&b1(), 1, &user("u1"), Some("ok"))
        .await
        .unwrap();
    assert_eq!(retried, published);

    let version = store.get_version(&b1(), 1).await.unwrap().unwrap();
    assert_eq!(version.status, VersionStatus::Approved);
    assert_eq!(version.approved_at, Some(published.published_at));
    assert_eq!(
        store
            .objects()
            .list("projects/site-7/entities/b1/published/", None)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_reconcile_repairs_interrupted_approval() {
    let faulty = Arc::new(FaultyObjectStore::new());
    let store = object_store(faulty.clone());
    submitted_b1(store.clone()).await;

    let other = EntityId::new("b2").unwrap();
    register(store.as_ref(), &other).await;
    store.insert_version(new_version(&other, 3.0)).await.unwrap();

    faulty.arm(true);
    PublishEngine::new(store.clone())
        .approve(&b1(), 1, &user("u1"), None)
        .await
        .unwrap_err();
    faulty.arm(false);

    let report = store.reconcile().await.unwrap();
    assert_eq!(report.entities_scanned, 2);
    assert_eq!(report.versions_scanned, 2);
    assert_eq!(report.repaired.len(), 1);
    assert_eq!(report.repaired[0].entity_id, b1());
    assert_eq!(report.snapshot.counters.approved, 1);
    assert_eq!(report.snapshot.counters.draft, 1);
    assert!(report.snapshot.submitted.is_empty());

    let version = store.get_version(&b1(), 1).await.unwrap().unwrap();
    assert_eq!(version.status, VersionStatus::Approved);
    assert_eq!(version.approved_by, Some(user("u1")));

    // Second sweep finds nothing to repair and writes the same views.
    let again = store.reconcile().await.unwrap();
    assert!(again.repaired.is_empty());
    assert_eq!(again.snapshot.counters, report.snapshot.counters);
    assert_eq!(again.snapshot.approved, report.snapshot.approved);

    let cached = store.cached_aggregates().await.unwrap();
    assert_eq!(cached.counters, report.snapshot.counters);
}

#[tokio::test]
async fn test_reject_refused_once_published() {
    let faulty = Arc::new(FaultyObjectStore::new());
    let store = object_store(faulty.clone());
    submitted_b1(store.clone()).await;

    faulty.arm(true);
    PublishEngine::new(store.clone())
        .approve(&b1(), 1, &user("u1"), None)
        .await
        .unwrap_err();
    faulty.arm(false);

    // The approval is on record; the version still reads submitted, but
    // rejecting it must not succeed.
    let err = WorkflowStateMachine::new(store.clone())
        .reject(&b1(), 1, &user("u2"), Some("too late"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidState(_)));
    assert_eq!(
        store.get_version(&b1(), 1).await.unwrap().unwrap().status,
        VersionStatus::Submitted
    );
}

#[tokio::test]
async fn test_reconcile_never_promotes_a_rejected_version() {
    let store = object_store(Arc::new(MemoryObjectStore::new()));
    submitted_b1(store.clone()).await;
    WorkflowStateMachine::new(store.clone())
        .reject(&b1(), 1, &user("u2"), Some("bad depth data"))
        .await
        .unwrap();

    let report = store.reconcile().await.unwrap();
    assert!(report.repaired.is_empty());
    assert_eq!(report.snapshot.counters.rejected, 1);
    let version = store.get_version(&b1(), 1).await.unwrap().unwrap();
    assert_eq!(version.status, VersionStatus::Rejected);
    assert!(store.latest_published(&b1()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reconcile_finishes_interrupted_rejection() {
    let faulty = Arc::new(FaultyObjectStore::new());
    let store = object_store(faulty.clone());
    submitted_b1(store.clone()).await;
    let machine = WorkflowStateMachine::new(store.clone());

    faulty.arm(true);
    machine
        .reject(&b1(), 1, &user("u2"), Some("bad depth data"))
        .await
        .unwrap_err();
    faulty.arm(false);

    // The rejection is on record, so neither approval nor another review goes through.
    let err = PublishEngine::new(store.clone())
        .approve(&b1(), 1, &user("u1"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)), "{:?}", err);
    let err = machine
        .return_for_revision(&b1(), 1, &user("u1"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidState(_)), "{:?}", err);

    let report = store.reconcile().await.unwrap();
    assert_eq!(report.repaired.len(), 1);
    let version = store.get_version(&b1(), 1).await.unwrap().unwrap();
    assert_eq!(version.status, VersionStatus::Rejected);
    assert_eq!(version.rejection_reason.as_deref(), Some("bad depth data"));
    assert!(store.get_published(&b1(), 1).await.unwrap().is_none());
}

async fn slow_submitted_b1() -> (Arc<SlowWrites>, Arc<ObjectWorkflowStore>) {
    let objects = Arc::new(SlowWrites::new());
    let store = object_store(objects.clone());
    submitted_b1(store.clone()).await;
    objects.delay.store(true, Ordering::SeqCst);
    (objects, store)
}

#[tokio::test]
async fn test_racing_reject_and_return_exactly_one_wins() {
    let (_objects, store) = slow_submitted_b1().await;
    let machine = WorkflowStateMachine::new(store.clone());

    let (id_a, id_b, u1, u2) = (b1(), b1(), user("u1"), user("u2"));
    let (rejected, returned) = tokio::join!(
        machine.reject(&id_a, 1, &u1, Some("bad depth data")),
        machine.return_for_revision(&id_b, 1, &u2, Some("add layers")),
    );
    assert_eq!(
        rejected.is_ok() as u8 + returned.is_ok() as u8,
        1,
        "reject={:?} return={:?}",
        rejected,
        returned
    );
    let loser = rejected.as_ref().err().or(returned.as_ref().err());
    assert!(matches!(loser, Some(WorkflowError::InvalidState(_))), "{:?}", loser);

    let version = store.get_version(&b1(), 1).await.unwrap().unwrap();
    if rejected.is_ok() {
        assert_eq!(version.status, VersionStatus::Rejected);
        assert_eq!(version.rejection_reason.as_deref(), Some("bad depth data"));
    } else {
        assert_eq!(version.status, VersionStatus::ReturnedForRevision);
        assert_eq!(version.rejection_reason, None);
    }
}

#[tokio::test]
async fn test_racing_reject_and_approve_never_publishes_a_rejection() {
    let (_objects, store) = slow_submitted_b1().await;
    let machine = WorkflowStateMachine::new(store.clone());
    let engine = PublishEngine::new(store.clone());

    let (id_a, id_b, u2, u1) = (b1(), b1(), user("u2"), user("u1"));
    let (rejected, approved) = tokio::join!(
        machine.reject(&id_a, 1, &u2, Some("bad depth data")),
        engine.approve(&id_b, 1, &u1, Some("ok")),
    );
    assert_eq!(
        rejected.is_ok() as u8 + approved.is_ok() as u8,
        1,
        "reject={:?} approve={:?}",
        rejected,
        approved
    );

    let version = store.get_version(&b1(), 1).await.unwrap().unwrap();
    let published = store.get_published(&b1(), 1).await.unwrap();
    if rejected.is_ok() {
        assert!(matches!(approved, Err(WorkflowError::Conflict(_))), "{:?}", approved);
        assert_eq!(version.status, VersionStatus::Rejected);
        assert!(published.is_none());
        assert!(store.latest_published(&b1()).await.unwrap().is_none());
    } else {
        assert!(matches!(rejected, Err(WorkflowError::InvalidState(_))), "{:?}", rejected);
        assert_eq!(version.status, VersionStatus::Approved);
        assert_eq!(published, approved.ok());
    }

    // Nothing for the sweep to change either way.
    let report = store.reconcile().await.unwrap();
    assert!(report.repaired.is_empty());
    assert_eq!(
        store.get_version(&b1(), 1).await.unwrap().unwrap().status,
        version.status
    );
}

#[tokio::test]
async fn test_racing_draft_edit_and_submit_exactly_one_wins() {
    let objects = Arc::new(SlowWrites::new());
    let store = object_store(objects.clone());
    register(store.as_ref(), &b1()).await;
    store.insert_version(new_version(&b1(), 7.0)).await.unwrap();
    objects.delay.store(true, Ordering::SeqCst);

    let versions = VersionStore::new(store.clone(), Arc::new(ValidatorRegistry::empty()));
    let machine = WorkflowStateMachine::new(store.clone());
    let (id_a, id_b, field_eng) = (b1(), b1(), user("field-eng"));
    let (edited, submitted) = tokio::join!(
        versions.update_draft(&id_a, 1, json!({"total_depth": 9.0})),
        machine.submit(&id_b, 1, &field_eng, None),
    );
    assert_eq!(
        edited.is_ok() as u8 + submitted.is_ok() as u8,
        1,
        "edit={:?} submit={:?}",
        edited,
        submitted
    );

    let version = store.get_version(&b1(), 1).await.unwrap().unwrap();
    if submitted.is_ok() {
        assert_eq!(version.status, VersionStatus::Submitted);
        assert_eq!(version.payload, json!({"total_depth": 7.0}));
    } else {
        assert_eq!(version.status, VersionStatus::Draft);
        assert_eq!(version.payload, json!({"total_depth": 9.0}));
    }
}
