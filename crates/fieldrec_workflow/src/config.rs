//! Workflow configuration, loaded from TOML.
//!
//! ```toml
//! [backend]
//! kind = "object_store"
//! root = "/var/lib/fieldrec/objects"
//!
//! [discovery]
//! max_candidates = 5000
//!
//! [[access.tokens]]
//! token = "approver-secret"
//! user_id = "u1"
//! roles = ["approver"]
//! ```
//!
//! Every section is optional.

use std::path::{Path, PathBuf};

use fieldrec_ids::UserId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::access::Role;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Unset means the caller picks a default location.
    pub backend: Option<BackendConfig>,
    pub discovery: DiscoveryConfig,
    pub allocation: AllocationConfig,
    pub access: AccessConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Sqlite { path: PathBuf },
    ObjectStore { root: PathBuf },
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Key prefix under which entity metadata documents are scanned.
    pub root_prefix: String,
    pub metadata_file: String,
    /// Upper bound on metadata documents fetched by one lookup scan.
    pub max_candidates: usize,
    /// Keys requested per list call while scanning.
    pub scan_page_size: usize,
    /// Consult and maintain `index/entities/{id}.json` documents.
    pub use_index: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            root_prefix: "projects/".to_string(),
            metadata_file: "metadata.json".to_string(),
            max_candidates: 1000,
            scan_page_size: 500,
            use_index: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    /// Create-only writes attempted before version allocation gives up.
    pub max_attempts: u32,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub tokens: Vec<TokenEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub user_id: UserId,
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl WorkflowConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discovery.max_candidates == 0 {
            return Err(ConfigError::Invalid(
                "discovery.max_candidates must be at least 1".to_string(),
            ));
        }
        if self.discovery.metadata_file.is_empty() || self.discovery.metadata_file.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "discovery.metadata_file must be a plain file name, got {:?}",
                self.discovery.metadata_file
            )));
        }
        if self.allocation.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "allocation.max_attempts must be at least 1".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for entry in &self.access.tokens {
            if entry.token.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "empty token configured for {}",
                    entry.user_id
                )));
            }
            if !seen.insert(entry.token.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "token for {} is configured more than once",
                    entry.user_id
                )));
            }
        }
        Ok(())
    }
}
