//! Record types shared by the workflow core and both storage adapters.

use chrono::{DateTime, Utc};
use fieldrec_ids::{CommentId, EntityId, ProjectId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WorkflowError};

/// Current time truncated to millisecond precision.
///
/// Both backends persist milliseconds, so records compare equal after a
/// round trip.
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Rejects version number 0, which is never allocated.
pub fn ensure_version_no(version_no: u32) -> Result<()> {
    if version_no == 0 {
        return Err(WorkflowError::validation(
            "version numbers start at 1; got 0",
        ));
    }
    Ok(())
}

// ============================================================================
// Enums
// ============================================================================

/// Kind of field record an entity holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    BoreholeLog,
    LabTest,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::BoreholeLog, EntityKind::LabTest];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BoreholeLog => "borehole_log",
            Self::LabTest => "lab_test",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "borehole_log" => Some(Self::BoreholeLog),
            "lab_test" => Some(Self::LabTest),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a single version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
    ReturnedForRevision,
}

impl VersionStatus {
    pub const ALL: [VersionStatus; 5] = [
        VersionStatus::Draft,
        VersionStatus::Submitted,
        VersionStatus::Approved,
        VersionStatus::Rejected,
        VersionStatus::ReturnedForRevision,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::ReturnedForRevision => "returned_for_revision",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "returned_for_revision" => Some(Self::ReturnedForRevision),
            _ => None,
        }
    }

    /// No transition leaves this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::ReturnedForRevision)
    }

    /// A new draft may be created from a version in this status.
    pub fn allows_revision(&self) -> bool {
        matches!(self, Self::ReturnedForRevision | Self::Rejected)
    }
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status-changing requests accepted by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowAction {
    Submit,
    Approve,
    Reject,
    ReturnForRevision,
}

impl WorkflowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::ReturnForRevision => "return_for_revision",
        }
    }

    /// The only status this action may start from.
    pub fn source_status(&self) -> VersionStatus {
        match self {
            Self::Submit => VersionStatus::Draft,
            Self::Approve | Self::Reject | Self::ReturnForRevision => VersionStatus::Submitted,
        }
    }

    pub fn target_status(&self) -> VersionStatus {
        match self {
            Self::Submit => VersionStatus::Submitted,
            Self::Approve => VersionStatus::Approved,
            Self::Reject => VersionStatus::Rejected,
            Self::ReturnForRevision => VersionStatus::ReturnedForRevision,
        }
    }

    pub fn requires_approver(&self) -> bool {
        !matches!(self, Self::Submit)
    }

    pub fn comment_type(&self) -> CommentType {
        match self {
            Self::Submit => CommentType::Submission,
            Self::Approve => CommentType::Approval,
            Self::Reject => CommentType::Rejection,
            Self::ReturnForRevision => CommentType::CorrectionRequired,
        }
    }
}

impl std::fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentType {
    Submission,
    Approval,
    Rejection,
    CorrectionRequired,
}

impl CommentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submission => "submission",
            Self::Approval => "approval",
            Self::Rejection => "rejection",
            Self::CorrectionRequired => "correction_required",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "submission" => Some(Self::Submission),
            "approval" => Some(Self::Approval),
            "rejection" => Some(Self::Rejection),
            "correction_required" => Some(Self::CorrectionRequired),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Records
// ============================================================================

/// A registered entity and the project it lives under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRegistration {
    pub entity_id: EntityId,
    pub entity_kind: EntityKind,
    pub project: ProjectId,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// One immutable-numbered version of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub entity_id: EntityId,
    pub entity_kind: EntityKind,
    pub version_no: u32,
    pub status: VersionStatus,
    pub payload: Value,
    /// The prior version this one revises.
    #[serde(default)]
    pub based_on: Option<u32>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub submitted_by: Option<UserId>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub approved_by: Option<UserId>,
    #[serde(default)]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rejected_by: Option<UserId>,
    #[serde(default)]
    pub returned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub returned_by: Option<UserId>,
    #[serde(default)]
    pub review_comments: Option<String>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

impl VersionRecord {
    /// Fresh draft for an allocated version number.
    pub fn draft(new: NewVersion, version_no: u32) -> Self {
        Self {
            entity_id: new.entity_id,
            entity_kind: new.entity_kind,
            version_no,
            status: VersionStatus::Draft,
            payload: new.payload,
            based_on: new.based_on,
            created_by: new.created_by,
            created_at: new.created_at,
            updated_at: new.created_at,
            submitted_at: None,
            submitted_by: None,
            approved_at: None,
            approved_by: None,
            rejected_at: None,
            rejected_by: None,
            returned_at: None,
            returned_by: None,
            review_comments: None,
            rejection_reason: None,
        }
    }

    /// `"{entity_id} v{version_no}"`, used in log lines and error messages.
    pub fn label(&self) -> String {
        format!("{} v{}", self.entity_id, self.version_no)
    }
}

/// Input to version allocation; the store assigns the number.
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub entity_id: EntityId,
    pub entity_kind: EntityKind,
    pub payload: Value,
    pub based_on: Option<u32>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// The published copy of an approved version. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedRecord {
    pub entity_id: EntityId,
    pub entity_kind: EntityKind,
    pub version_no: u32,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
    pub approved_by: UserId,
}

impl PublishedRecord {
    pub fn from_version(version: &VersionRecord, approved_by: &UserId, at: DateTime<Utc>) -> Self {
        Self {
            entity_id: version.entity_id.clone(),
            entity_kind: version.entity_kind,
            version_no: version.version_no,
            payload: version.payload.clone(),
            published_at: at,
            approved_by: approved_by.clone(),
        }
    }
}

/// An append-only review comment attached to one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub comment_id: CommentId,
    pub entity_id: EntityId,
    pub version_no: u32,
    pub comment_type: CommentType,
    pub text: String,
    pub author: UserId,
    pub timestamp: DateTime<Utc>,
}

impl Comment {
    pub fn new(
        entity_id: EntityId,
        version_no: u32,
        comment_type: CommentType,
        text: impl Into<String>,
        author: UserId,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            comment_id: CommentId::new(),
            entity_id,
            version_no,
            comment_type,
            text: text.into(),
            author,
            timestamp,
        }
    }
}

/// Result of a successful status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub entity_id: EntityId,
    pub version_no: u32,
    pub status: VersionStatus,
    pub actor: UserId,
    pub timestamp: DateTime<Utc>,
}

/// An (entity, version) pair in aggregate listings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionRef {
    pub entity_id: EntityId,
    pub version_no: u32,
}

impl From<&VersionRecord> for VersionRef {
    fn from(record: &VersionRecord) -> Self {
        Self {
            entity_id: record.entity_id.clone(),
            version_no: record.version_no,
        }
    }
}
