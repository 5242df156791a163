//! Key layout of the object-store backend.
//!
//! ```text
//! {root}{project}/entities/{slug}/metadata.json
//! {root}{project}/entities/{slug}/versions/{v:010}.json
//! {root}{project}/entities/{slug}/versions/{v:010}.r{rev:06}.json
//! {root}{project}/entities/{slug}/decisions/{v:010}.json
//! {root}{project}/entities/{slug}/published/{v:010}.json
//! {root}{project}/entities/{slug}/comments/{v:010}/{ts:013}-{uuid}.json
//! index/entities/{entity_id}.json
//! aggregates/{approved,submitted,counters}.json
//! ```
//!
//! `{root}` defaults to `projects/`. Version numbers are zero-padded so key
//! order equals numeric order.
//!
//! A version document is never overwritten. `versions/{v:010}.json` is the
//! draft written at allocation and every later change is a new revision
//! beside it, claimed with a create-only write; the highest revision is the
//! current state. `decisions/{v:010}.json` holds the one review outcome a
//! submitted version may receive, also create-only.

use chrono::{DateTime, Utc};
use fieldrec_ids::{CommentId, EntityId, ProjectId};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

const INDEX_PREFIX: &str = "index/entities/";
pub const AGGREGATE_APPROVED_KEY: &str = "aggregates/approved.json";
pub const AGGREGATE_SUBMITTED_KEY: &str = "aggregates/submitted.json";
pub const AGGREGATE_COUNTERS_KEY: &str = "aggregates/counters.json";

/// The parent path segments of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityLocation {
    pub project: ProjectId,
    pub slug: String,
}

impl EntityLocation {
    /// Entities are stored under their own ID as slug.
    pub fn for_entity(project: ProjectId, entity_id: &EntityId) -> Self {
        Self {
            project,
            slug: entity_id.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Layout {
    root_prefix: String,
    metadata_file: String,
}

impl Layout {
    pub fn new(root_prefix: impl Into<String>, metadata_file: impl Into<String>) -> Self {
        let mut root_prefix = root_prefix.into();
        if !root_prefix.is_empty() && !root_prefix.ends_with('/') {
            root_prefix.push('/');
        }
        Self {
            root_prefix,
            metadata_file: metadata_file.into(),
        }
    }

    pub fn root_prefix(&self) -> &str {
        &self.root_prefix
    }

    /// `{root}{project}/entities/{slug}/`
    pub fn entity_prefix(&self, loc: &EntityLocation) -> String {
        format!("{}{}/entities/{}/", self.root_prefix, loc.project, loc.slug)
    }

    pub fn metadata_key(&self, loc: &EntityLocation) -> String {
        format!("{}{}", self.entity_prefix(loc), self.metadata_file)
    }

    pub fn is_metadata_key(&self, key: &str) -> bool {
        key.starts_with(&self.root_prefix)
            && key
                .strip_suffix(self.metadata_file.as_str())
                .is_some_and(|rest| rest.ends_with('/'))
    }

    /// Recovers project and slug from a metadata key.
    pub fn location_from_metadata_key(&self, key: &str) -> Result<EntityLocation, StorageError> {
        let inner = key
            .strip_prefix(self.root_prefix.as_str())
            .and_then(|rest| rest.strip_suffix(self.metadata_file.as_str()))
            .and_then(|rest| rest.strip_suffix('/'))
            .ok_or_else(|| StorageError::corrupt_key(key, "not a metadata key"))?;
        let parts: Vec<&str> = inner.split('/').collect();
        match parts.as_slice() {
            [project, "entities", slug] => Ok(EntityLocation {
                project: ProjectId::new(*project)
                    .map_err(|e| StorageError::corrupt_key(key, e.to_string()))?,
                slug: (*slug).to_string(),
            }),
            _ => Err(StorageError::corrupt_key(
                key,
                "expected {project}/entities/{slug}",
            )),
        }
    }

    pub fn versions_prefix(&self, loc: &EntityLocation) -> String {
        format!("{}versions/", self.entity_prefix(loc))
    }

    pub fn version_key(&self, loc: &EntityLocation, version_no: u32) -> String {
        format!("{}{:010}.json", self.versions_prefix(loc), version_no)
    }

    /// Every revision of one version, and nothing of any other version.
    pub fn version_revisions_prefix(&self, loc: &EntityLocation, version_no: u32) -> String {
        format!("{}{:010}.", self.versions_prefix(loc), version_no)
    }

    /// Revision 0 is [`Layout::version_key`].
    pub fn version_revision_key(
        &self,
        loc: &EntityLocation,
        version_no: u32,
        revision: u32,
    ) -> String {
        if revision == 0 {
            return self.version_key(loc, version_no);
        }
        format!(
            "{}{:010}.r{:06}.json",
            self.versions_prefix(loc),
            version_no,
            revision
        )
    }

    pub fn decision_key(&self, loc: &EntityLocation, version_no: u32) -> String {
        format!("{}decisions/{:010}.json", self.entity_prefix(loc), version_no)
    }

    pub fn published_prefix(&self, loc: &EntityLocation) -> String {
        format!("{}published/", self.entity_prefix(loc))
    }

    pub fn published_key(&self, loc: &EntityLocation, version_no: u32) -> String {
        format!("{}{:010}.json", self.published_prefix(loc), version_no)
    }

    pub fn comments_prefix(&self, loc: &EntityLocation) -> String {
        format!("{}comments/", self.entity_prefix(loc))
    }

    pub fn version_comments_prefix(&self, loc: &EntityLocation, version_no: u32) -> String {
        format!("{}{:010}/", self.comments_prefix(loc), version_no)
    }

    pub fn comment_key(
        &self,
        loc: &EntityLocation,
        version_no: u32,
        timestamp: DateTime<Utc>,
        comment_id: &CommentId,
    ) -> String {
        format!(
            "{}{:013}-{}.json",
            self.version_comments_prefix(loc, version_no),
            timestamp.timestamp_millis().max(0),
            comment_id
        )
    }

    pub fn index_key(&self, entity_id: &EntityId) -> String {
        format!("{}{}.json", INDEX_PREFIX, entity_id)
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::new("projects/", "metadata.json")
    }
}

/// Highest revision number a version may reach.
pub const MAX_REVISION: u32 = 999_999;

/// Splits the last key segment into version and optional revision digits.
fn version_segments(key: &str) -> Result<(&str, Option<&str>), StorageError> {
    let file = key.rsplit('/').next().unwrap_or(key);
    let stem = file
        .strip_suffix(".json")
        .ok_or_else(|| StorageError::corrupt_key(key, "missing .json suffix"))?;
    Ok(match stem.split_once(".r") {
        Some((version, revision)) => (version, Some(revision)),
        None => (stem, None),
    })
}

/// Version number encoded in the last segment of a version, revision or
/// published key.
pub fn parse_version_no(key: &str) -> Result<u32, StorageError> {
    let (digits, _) = version_segments(key)?;
    let version_no: u32 = digits
        .parse()
        .map_err(|_| StorageError::corrupt_key(key, "version segment is not a number"))?;
    if version_no == 0 {
        return Err(StorageError::corrupt_key(key, "version 0"));
    }
    Ok(version_no)
}

/// Revision number of a version key; the allocation document is revision 0.
pub fn parse_revision(key: &str) -> Result<u32, StorageError> {
    match version_segments(key)? {
        (_, None) => Ok(0),
        (_, Some(digits)) => match digits.parse::<u32>() {
            Ok(revision) if revision > 0 && revision <= MAX_REVISION => Ok(revision),
            _ => Err(StorageError::corrupt_key(key, "bad revision segment")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> EntityLocation {
        EntityLocation {
            project: ProjectId::new("site-7").unwrap(),
            slug: "b1".to_string(),
        }
    }

    #[test]
    fn test_keys() {
        let layout = Layout::default();
        assert_eq!(
            layout.metadata_key(&loc()),
            "projects/site-7/entities/b1/metadata.json"
        );
        assert_eq!(
            layout.version_key(&loc(), 12),
            "projects/site-7/entities/b1/versions/0000000012.json"
        );
        assert_eq!(
            layout.version_revision_key(&loc(), 12, 0),
            layout.version_key(&loc(), 12)
        );
        assert_eq!(
            layout.version_revision_key(&loc(), 12, 3),
            "projects/site-7/entities/b1/versions/0000000012.r000003.json"
        );
        assert_eq!(
            layout.decision_key(&loc(), 2),
            "projects/site-7/entities/b1/decisions/0000000002.json"
        );
        assert_eq!(
            layout.published_key(&loc(), 1),
            "projects/site-7/entities/b1/published/0000000001.json"
        );
        assert_eq!(
            layout.index_key(&EntityId::new("b1").unwrap()),
            "index/entities/b1.json"
        );
    }

    #[test]
    fn test_root_prefix_gets_trailing_slash() {
        let layout = Layout::new("tenants/acme", "meta.json");
        assert_eq!(
            layout.metadata_key(&loc()),
            "tenants/acme/site-7/entities/b1/meta.json"
        );
    }

    #[test]
    fn test_metadata_key_roundtrip() {
        let layout = Layout::default();
        let key = layout.metadata_key(&loc());
        assert!(layout.is_metadata_key(&key));
        assert_eq!(layout.location_from_metadata_key(&key).unwrap(), loc());

        assert!(!layout.is_metadata_key("projects/site-7/entities/b1/versions/0000000001.json"));
        assert!(!layout.is_metadata_key("projects/site-7/entities/b1/oldmetadata.json"));
        assert!(layout
            .location_from_metadata_key("projects/site-7/b1/metadata.json")
            .is_err());
    }

    #[test]
    fn test_parse_version_no() {
        assert_eq!(
            parse_version_no("projects/p/entities/b1/versions/0000000007.json").unwrap(),
            7
        );
        assert!(parse_version_no("x/versions/abc.json").is_err());
        assert!(parse_version_no("x/versions/0000000000.json").is_err());
        assert!(parse_version_no("x/versions/0000000001").is_err());
        assert_eq!(parse_version_no("x/versions/0000000007.r000002.json").unwrap(), 7);
    }

    #[test]
    fn test_revisions_sort_after_their_version_and_before_the_next() {
        let layout = Layout::default();
        let mut keys = vec![
            layout.version_revision_key(&loc(), 2, 0),
            layout.version_revision_key(&loc(), 1, 11),
            layout.version_revision_key(&loc(), 1, 2),
            layout.version_revision_key(&loc(), 1, 0),
        ];
        keys.sort();
        let parsed: Vec<(u32, u32)> = keys
            .iter()
            .map(|k| (parse_version_no(k).unwrap(), parse_revision(k).unwrap()))
            .collect();
        assert_eq!(parsed, vec![(1, 0), (1, 2), (1, 11), (2, 0)]);

        let prefix = layout.version_revisions_prefix(&loc(), 1);
        assert!(keys[..3].iter().all(|k| k.starts_with(&prefix)));
        assert!(!keys[3].starts_with(&prefix));

        assert!(parse_revision("x/versions/0000000001.r000000.json").is_err());
        assert!(parse_revision("x/versions/0000000001.rabc.json").is_err());
    }
}
