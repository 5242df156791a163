//! Versioned approval workflow for engineering field records.
//!
//! Borehole logs and lab test reports move through
//! draft → submitted → approved / rejected / returned_for_revision. Every
//! version is kept; an approved version is copied once into the published
//! record set.
//!
//! The core ([`VersionStore`], [`WorkflowStateMachine`], [`PublishEngine`],
//! [`CommentLog`]) is written against the [`WorkflowStore`] trait. This crate
//! ships the object-store adapter ([`ObjectWorkflowStore`]); the SQLite
//! adapter lives in `fieldrec_db`.

pub mod access;
pub mod aggregates;
pub mod comments;
pub mod config;
pub mod discovery;
pub mod error;
pub mod layout;
pub mod object_backend;
pub mod object_store;
pub mod publish;
pub mod reconcile;
pub mod service;
pub mod state_machine;
pub mod store;
pub mod types;
pub mod validation;
pub mod version_store;

pub use access::{AccessGate, Credential, Principal, Role, StaticAccessGate};
pub use aggregates::{AggregateSnapshot, ReconcileReport, StatusCounters};
pub use comments::{CommentLog, VersionComments};
pub use config::{BackendConfig, ConfigError, WorkflowConfig};
pub use discovery::{DiscoveryDocument, DiscoveryIndex, IndexRebuildReport, ResolvedEntity};
pub use error::{Result, StorageError, WorkflowError};
pub use object_backend::ObjectWorkflowStore;
pub use object_store::{FsObjectStore, MemoryObjectStore, ObjectStore};
pub use publish::PublishEngine;
pub use service::WorkflowService;
pub use state_machine::WorkflowStateMachine;
pub use store::{ApprovalCommit, ApprovalOutcome, WorkflowStore};
pub use types::*;
pub use validation::{PayloadValidator, ValidatorRegistry};
pub use version_store::VersionStore;
