//! Shared identifier wrappers for field record workflows.
//!
//! Entity, user and project identifiers are opaque strings chosen by callers
//! (`"b1"`, `"BH-204"`, ...). They end up as path segments in object-store keys,
//! so they are restricted to a key-safe alphabet at construction time.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Longest accepted opaque identifier, in bytes.
pub const MAX_ID_LEN: usize = 128;

/// Error returned when parsing an identifier fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    message: String,
}

impl IdParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for IdParseError {}

/// Checks that `value` can be used verbatim as one key segment.
pub fn validate_key_segment(value: &str, label: &str) -> Result<(), IdParseError> {
    if value.is_empty() {
        return Err(IdParseError::new(format!("{} must not be empty", label)));
    }
    if value.len() > MAX_ID_LEN {
        return Err(IdParseError::new(format!(
            "{} exceeds {} bytes",
            label, MAX_ID_LEN
        )));
    }
    if value == "." || value == ".." {
        return Err(IdParseError::new(format!("Invalid {}: {}", label, value)));
    }
    if let Some(bad) = value
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.')))
    {
        return Err(IdParseError::new(format!(
            "Invalid {}: character {:?} not allowed in {:?}",
            label, bad, value
        )));
    }
    Ok(())
}

macro_rules! define_key_id {
    ($name:ident, $label:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Result<Self, IdParseError> {
                let value = value.into();
                validate_key_segment(&value, $label)?;
                Ok(Self(value))
            }

            pub fn parse(value: &str) -> Result<Self, IdParseError> {
                Self::new(value)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdParseError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

macro_rules! define_uuid_id {
    ($name:ident, $label:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn parse(value: &str) -> Result<Self, IdParseError> {
                Uuid::parse_str(value)
                    .map_err(|e| IdParseError::new(format!("Invalid {}: {}", $label, e)))?;
                Ok(Self(value.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

define_key_id!(EntityId, "entity ID");
define_key_id!(UserId, "user ID");
define_key_id!(ProjectId, "project ID");
define_uuid_id!(CommentId, "comment ID");
