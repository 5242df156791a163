//! Error types for the database layer.

use fieldrec_workflow::{StorageError, WorkflowError};
use thiserror::Error;

/// Database operation result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLx error (connection, query, etc.)
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// IO error (file system operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Constraint violation (unique, foreign key, etc.)
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row does not decode into a valid record
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl DbError {
    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a constraint error.
    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }
}

impl From<DbError> for WorkflowError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => WorkflowError::NotFound(msg),
            DbError::Constraint(msg) => WorkflowError::Conflict(msg),
            DbError::Io(err) => WorkflowError::Storage(StorageError::Io(err)),
            DbError::Serialization(err) => WorkflowError::Storage(StorageError::Serialization(err)),
            DbError::Corrupt(msg) => WorkflowError::Storage(StorageError::CorruptRecord(msg)),
            DbError::Sqlx(err) => WorkflowError::Storage(StorageError::Database(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maps_onto_workflow_errors() {
        assert!(matches!(
            WorkflowError::from(DbError::constraint("dup")),
            WorkflowError::Conflict(_)
        ));
        assert!(matches!(
            WorkflowError::from(DbError::not_found("b1")),
            WorkflowError::NotFound(_)
        ));
        assert!(matches!(
            WorkflowError::from(DbError::Sqlx(sqlx::Error::RowNotFound)),
            WorkflowError::Storage(StorageError::Database(_))
        ));
    }
}
