//! Caller identity and role checks.
//!
//! Authentication is external to the workflow; an [`AccessGate`] turns an
//! opaque credential into a [`Principal`]. [`StaticAccessGate`] is a fixed
//! token table used by the CLI and tests.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use fieldrec_ids::UserId;
use serde::{Deserialize, Serialize};

use crate::config::AccessConfig;
use crate::error::{Result, WorkflowError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Creates, edits and submits versions.
    Author,
    /// Approves, rejects and returns submitted versions.
    Approver,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Author => "author",
            Self::Approver => "approver",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub roles: Vec<Role>,
}

impl Principal {
    pub fn new(user_id: UserId, roles: Vec<Role>) -> Self {
        Self { user_id, roles }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role) || self.roles.contains(&Role::Admin)
    }

    pub fn require(&self, role: Role) -> Result<()> {
        if self.has_role(role) {
            Ok(())
        } else {
            Err(WorkflowError::forbidden(format!(
                "{} lacks the {} role",
                self.user_id, role
            )))
        }
    }
}

/// A bearer token. Debug output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Resolves credentials to principals.
#[async_trait]
pub trait AccessGate: Send + Sync {
    /// Fails with `Unauthorized` for unknown or malformed credentials.
    async fn resolve(&self, credential: &Credential) -> Result<Principal>;
}

/// Fixed token → principal table.
#[derive(Debug, Default)]
pub struct StaticAccessGate {
    tokens: HashMap<String, Principal>,
}

impl StaticAccessGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AccessConfig) -> Self {
        let mut gate = Self::new();
        for entry in &config.tokens {
            gate.insert(entry.token.clone(), Principal::new(entry.user_id.clone(), entry.roles.clone()));
        }
        gate
    }

    pub fn insert(&mut self, token: impl Into<String>, principal: Principal) {
        self.tokens.insert(token.into(), principal);
    }

    pub fn with_token(mut self, token: impl Into<String>, principal: Principal) -> Self {
        self.insert(token, principal);
        self
    }
}

#[async_trait]
impl AccessGate for StaticAccessGate {
    async fn resolve(&self, credential: &Credential) -> Result<Principal> {
        if credential.token().is_empty() {
            return Err(WorkflowError::unauthorized("missing credential"));
        }
        self.tokens
            .get(credential.token())
            .cloned()
            .ok_or_else(|| WorkflowError::unauthorized("unknown token"))
    }
}
