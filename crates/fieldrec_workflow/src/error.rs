//! Error types for the workflow core.

use thiserror::Error;

/// Workflow operation result type.
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Failures raised by a storage adapter.
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO error (file system operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Document could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Relational backend failure
    #[error("Database error: {0}")]
    Database(String),

    /// A stored key does not follow the expected layout
    #[error("Corrupt key {key}: {reason}")]
    CorruptKey { key: String, reason: String },

    /// A stored value does not decode into the expected shape
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),
}

impl StorageError {
    pub fn corrupt_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn corrupt_record(msg: impl Into<String>) -> Self {
        Self::CorruptRecord(msg.into())
    }
}

/// Errors returned by every workflow operation.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Allocation exhausted, duplicate registration, or a version that is not
    /// in the state the operation requires.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Transition precondition failed; nothing was written.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl WorkflowError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Short machine-readable label, used in CLI error output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::InvalidState(_) => "invalid_state",
            Self::Validation(_) => "validation",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Storage(_) => "storage",
        }
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(StorageError::Serialization(err))
    }
}

impl From<std::io::Error> for WorkflowError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(StorageError::Io(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_wrap_into_workflow_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err: WorkflowError = io.into();
        assert_eq!(err.kind(), "storage");
        assert!(err.to_string().contains("disk gone"));
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(WorkflowError::conflict("x").kind(), "conflict");
        assert_eq!(WorkflowError::invalid_state("x").kind(), "invalid_state");
        assert_eq!(
            WorkflowError::not_found("b1").to_string(),
            "Not found: b1"
        );
    }
}
