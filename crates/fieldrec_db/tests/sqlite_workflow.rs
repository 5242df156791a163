//! Workflow scenarios against the SQLite backend.

use std::collections::BTreeSet;
use std::sync::Arc;

use fieldrec_db::RecordDb;
use fieldrec_ids::{EntityId, ProjectId, UserId};
use fieldrec_workflow::{
    now, ApprovalCommit, CommentType, Credential, EntityKind, Principal, PublishedRecord, Role,
    StaticAccessGate, VersionStatus, WorkflowAction, WorkflowError, WorkflowService,
    WorkflowStateMachine, WorkflowStore,
};
use serde_json::json;
use sqlx::Row;
use tempfile::TempDir;

const AUTHOR: &str = "author-token";
const APPROVER: &str = "approver-token";
const ADMIN: &str = "admin-token";

fn gate() -> StaticAccessGate {
    StaticAccessGate::new()
        .with_token(
            AUTHOR,
            Principal::new(UserId::new("field-eng").unwrap(), vec![Role::Author]),
        )
        .with_token(
            APPROVER,
            Principal::new(UserId::new("u1").unwrap(), vec![Role::Approver]),
        )
        .with_token(
            ADMIN,
            Principal::new(UserId::new("ops").unwrap(), vec![Role::Admin]),
        )
}

fn service(db: &RecordDb) -> WorkflowService {
    WorkflowService::new(Arc::new(db.clone()), Arc::new(gate()))
}

fn b1() -> EntityId {
    EntityId::new("b1").unwrap()
}

fn borehole(depth: f64) -> serde_json::Value {
    json!({"total_depth": depth, "layers": [{"top": 0.0, "bottom": depth}]})
}

async fn register_b1(svc: &WorkflowService) {
    svc.register_entity(
        &Credential::bearer(AUTHOR),
        b1(),
        EntityKind::BoreholeLog,
        ProjectId::new("site-7").unwrap(),
    )
    .await
    .unwrap();
}

async fn submitted_v1(svc: &WorkflowService) {
    let author = Credential::bearer(AUTHOR);
    svc.create_version(&author, &b1(), EntityKind::BoreholeLog, borehole(18.5))
        .await
        .unwrap();
    svc.submit(&author, &b1(), 1, None).await.unwrap();
}

async fn published_rows(db: &RecordDb) -> i64 {
    sqlx::query("SELECT COUNT(*) AS n FROM published_records")
        .fetch_one(db.pool())
        .await
        .unwrap()
        .get("n")
}

#[tokio::test]
async fn test_create_submit_approve() {
    let db = RecordDb::open_in_memory().await.unwrap();
    let svc = service(&db);
    register_b1(&svc).await;
    submitted_v1(&svc).await;

    let outcome = svc
        .approve(&Credential::bearer(APPROVER), &b1(), 1, Some("ok"))
        .await
        .unwrap();
    assert_eq!(outcome.status, VersionStatus::Approved);
    assert_eq!(outcome.actor.as_str(), "u1");

    let published = svc.get_latest_published(&b1()).await.unwrap();
    assert_eq!(published.payload, borehole(18.5));
    assert_eq!(published.approved_by.as_str(), "u1");

    let stored = svc.get_version(&b1(), 1).await.unwrap();
    assert_eq!(stored.status, VersionStatus::Approved);
    assert_eq!(stored.approved_at, Some(published.published_at));
    assert_eq!(stored.review_comments.as_deref(), Some("ok"));

    let comments = svc.list_comments(&b1(), 1).await.unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].comment_type, CommentType::Approval);
}

#[tokio::test]
async fn test_approval_overtaken_by_reject_is_conflict() {
    let db = RecordDb::open_in_memory().await.unwrap();
    let svc = service(&db);
    register_b1(&svc).await;
    submitted_v1(&svc).await;

    // Stamped while the version was still submitted.
    let approver = UserId::new("u1").unwrap();
    let at = now();
    let submitted = svc.get_version(&b1(), 1).await.unwrap();
    let approved =
        WorkflowStateMachine::prepare(&submitted, WorkflowAction::Approve, &approver, None, at)
            .unwrap();
    let commit = ApprovalCommit {
        published: PublishedRecord::from_version(&approved, &approver, at),
        version: approved,
        comment: None,
    };

    svc.reject(&Credential::bearer(APPROVER), &b1(), 1, Some("bad depth data"))
        .await
        .unwrap();

    let err = db.commit_approval(&commit).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)), "{:?}", err);
    assert_eq!(published_rows(&db).await, 0);
    assert_eq!(
        svc.get_version(&b1(), 1).await.unwrap().status,
        VersionStatus::Rejected
    );
}

#[tokio::test]
async fn test_reject_then_approve_conflicts() {
    let db = RecordDb::open_in_memory().await.unwrap();
    let svc = service(&db);
    register_b1(&svc).await;
    submitted_v1(&svc).await;
    let approver = Credential::bearer(APPROVER);

    svc.reject(&approver, &b1(), 1, Some("bad depth data"))
        .await
        .unwrap();
    let v1 = svc.get_version(&b1(), 1).await.unwrap();
    assert_eq!(v1.status, VersionStatus::Rejected);
    assert_eq!(v1.rejection_reason.as_deref(), Some("bad depth data"));

    let err = svc.approve(&approver, &b1(), 1, None).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)), "{:?}", err);
    assert_eq!(published_rows(&db).await, 0);
}

#[tokio::test]
async fn test_approve_draft_conflicts_without_writing() {
    let db = RecordDb::open_in_memory().await.unwrap();
    let svc = service(&db);
    register_b1(&svc).await;
    svc.create_version(
        &Credential::bearer(AUTHOR),
        &b1(),
        EntityKind::BoreholeLog,
        borehole(4.0),
    )
    .await
    .unwrap();

    let err = svc
        .approve(&Credential::bearer(APPROVER), &b1(), 1, Some("ok"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)), "{:?}", err);
    assert_eq!(svc.get_version(&b1(), 1).await.unwrap().status, VersionStatus::Draft);
    assert!(svc.list_comments(&b1(), 1).await.unwrap().is_empty());
    assert_eq!(published_rows(&db).await, 0);
}

#[tokio::test]
async fn test_approve_twice_returns_same_record() {
    let db = RecordDb::open_in_memory().await.unwrap();
    let svc = service(&db);
    register_b1(&svc).await;
    submitted_v1(&svc).await;
    let approver = Credential::bearer(APPROVER);

    let first = svc.approve(&approver, &b1(), 1, Some("ok")).await.unwrap();
    let second = svc.approve(&approver, &b1(), 1, Some("ok")).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(published_rows(&db).await, 1);
    assert_eq!(svc.list_comments(&b1(), 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unregistered_entity_is_not_found() {
    let db = RecordDb::open_in_memory().await.unwrap();
    let svc = service(&db);
    let err = svc
        .create_version(
            &Credential::bearer(AUTHOR),
            &b1(),
            EntityKind::BoreholeLog,
            borehole(3.0),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)), "{:?}", err);
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let db = RecordDb::open_in_memory().await.unwrap();
    let svc = service(&db);
    register_b1(&svc).await;
    let err = svc
        .register_entity(
            &Credential::bearer(AUTHOR),
            b1(),
            EntityKind::LabTest,
            ProjectId::new("site-8").unwrap(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)), "{:?}", err);
}

#[tokio::test]
async fn test_return_and_revise_keeps_history() {
    let db = RecordDb::open_in_memory().await.unwrap();
    let svc = service(&db);
    register_b1(&svc).await;
    submitted_v1(&svc).await;
    let author = Credential::bearer(AUTHOR);

    svc.return_for_revision(
        &Credential::bearer(APPROVER),
        &b1(),
        1,
        Some("layer 2 missing"),
    )
    .await
    .unwrap();
    let v2 = svc
        .create_revision(&author, &b1(), 1, Some(borehole(20.0)))
        .await
        .unwrap();
    assert_eq!(v2.version_no, 2);
    assert_eq!(v2.based_on, Some(1));
    assert_eq!(v2.status, VersionStatus::Draft);

    let versions = svc.list_versions(&b1()).await.unwrap();
    let numbers: Vec<u32> = versions.iter().map(|v| v.version_no).collect();
    assert_eq!(numbers, vec![2, 1]);
    assert_eq!(versions[1].status, VersionStatus::ReturnedForRevision);

    let history = svc.history(&b1()).await.unwrap();
    assert_eq!(history[0].version_no, 2);
    assert_eq!(history[1].comments.len(), 1);
    assert_eq!(
        history[1].comments[0].comment_type,
        CommentType::CorrectionRequired
    );
}

#[tokio::test]
async fn test_reconcile_requires_admin_and_counts() {
    let db = RecordDb::open_in_memory().await.unwrap();
    let svc = service(&db);
    register_b1(&svc).await;
    submitted_v1(&svc).await;
    svc.create_version(
        &Credential::bearer(AUTHOR),
        &b1(),
        EntityKind::BoreholeLog,
        borehole(6.0),
    )
    .await
    .unwrap();

    let err = svc
        .reconcile(&Credential::bearer(APPROVER))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Forbidden(_)), "{:?}", err);

    let report = svc.reconcile(&Credential::bearer(ADMIN)).await.unwrap();
    assert_eq!(report.entities_scanned, 1);
    assert_eq!(report.versions_scanned, 2);
    assert_eq!(report.snapshot.counters.submitted, 1);
    assert_eq!(report.snapshot.counters.draft, 1);
    assert!(report.repaired.is_empty());
}

// ----------------------------------------------------------------------
// Concurrency on a file database
// ----------------------------------------------------------------------

async fn file_db(tmp: &TempDir) -> RecordDb {
    RecordDb::open(tmp.path().join("fieldrec.db")).await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_creates_get_distinct_numbers() {
    let tmp = TempDir::new().unwrap();
    let db = file_db(&tmp).await;
    let svc = Arc::new(service(&db));
    register_b1(&svc).await;

    let mut handles = Vec::new();
    for depth in 1..=8 {
        let svc = svc.clone();
        handles.push(tokio::spawn(async move {
            svc.create_version(
                &Credential::bearer(AUTHOR),
                &b1(),
                EntityKind::BoreholeLog,
                borehole(f64::from(depth)),
            )
            .await
            .unwrap()
            .version_no
        }));
    }

    let mut numbers = BTreeSet::new();
    for handle in handles {
        assert!(numbers.insert(handle.await.unwrap()));
    }
    assert_eq!(numbers, (1..=8).collect::<BTreeSet<u32>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_approvals_publish_once() {
    let tmp = TempDir::new().unwrap();
    let db = file_db(&tmp).await;
    let svc = Arc::new(service(&db));
    register_b1(&svc).await;
    submitted_v1(&svc).await;

    let mut handles = Vec::new();
    for _ in 0..3 {
        let svc = svc.clone();
        handles.push(tokio::spawn(async move {
            svc.approve(&Credential::bearer(APPROVER), &b1(), 1, Some("ok"))
                .await
                .unwrap()
        }));
    }
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }
    assert!(outcomes.windows(2).all(|pair| pair[0] == pair[1]));

    assert_eq!(published_rows(&db).await, 1);
    let approvals = svc
        .list_comments(&b1(), 1)
        .await
        .unwrap()
        .into_iter()
        .filter(|c| c.comment_type == CommentType::Approval)
        .count();
    assert_eq!(approvals, 1);
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    {
        let db = file_db(&tmp).await;
        let svc = service(&db);
        register_b1(&svc).await;
        submitted_v1(&svc).await;
        db.close().await;
    }

    let db = RecordDb::open_existing(tmp.path().join("fieldrec.db"))
        .await
        .unwrap();
    let version = db.get_version(&b1(), 1).await.unwrap().unwrap();
    assert_eq!(version.status, VersionStatus::Submitted);
    assert_eq!(version.submitted_by.map(|u| u.to_string()).as_deref(), Some("field-eng"));
}
