use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use walkdir::WalkDir;

use super::{validate_key, ObjectStore};
use crate::error::StorageError;

const TEMP_PREFIX: &str = ".tmp_";

/// Object store backed by a directory tree: key `a/b/c.json` lives at
/// `<root>/a/b/c.json`.
///
/// Writes go to a temp file in the target directory first. `put` renames it
/// into place; `put_if_absent` hard-links it, which fails if the target
/// already exists.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, seg| path.join(seg)))
    }

    async fn write_temp(&self, target: &Path, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        let parent = target
            .parent()
            .ok_or_else(|| StorageError::corrupt_key(target.display().to_string(), "no parent"))?;
        tokio::fs::create_dir_all(parent).await?;
        let temp_path = parent.join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4()));
        tokio::fs::write(&temp_path, bytes).await?;
        Ok(temp_path)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let temp_path = self.write_temp(&path, &bytes).await?;
        tokio::fs::rename(&temp_path, &path).await?;
        debug!(key, len = bytes.len(), "wrote object");
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, bytes: Vec<u8>) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        let temp_path = self.write_temp(&path, &bytes).await?;
        let linked = tokio::fs::hard_link(&temp_path, &path).await;
        if let Err(err) = tokio::fs::remove_file(&temp_path).await {
            debug!(path = %temp_path.display(), "failed to remove temp object: {}", err);
        }
        match linked {
            Ok(()) => {
                debug!(key, len = bytes.len(), "created object");
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_page(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<String>, StorageError> {
        // Walk only the deepest directory the prefix names in full.
        let dir_part = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let start = dir_part
            .split('/')
            .filter(|seg| !seg.is_empty())
            .fold(self.root.clone(), |path, seg| path.join(seg));
        let root = self.root.clone();
        let prefix = prefix.to_string();
        let after = start_after.map(str::to_string);

        let keys = tokio::task::spawn_blocking(move || -> Result<Vec<String>, StorageError> {
            if !start.is_dir() {
                return Ok(Vec::new());
            }
            let mut keys = Vec::new();
            let walk = WalkDir::new(&start).into_iter().filter_entry(|entry| {
                // A directory whose every key sorts before the cursor is skipped whole.
                match (&after, entry.file_type().is_dir()) {
                    (Some(after), true) => relative_key(&root, entry.path())
                        .filter(|dir| !dir.is_empty())
                        .map_or(true, |dir| !subtree_before(&dir, after)),
                    _ => true,
                }
            });
            for entry in walk {
                let entry = entry.map_err(|e| StorageError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                    continue;
                }
                let Some(key) = relative_key(&root, entry.path()) else {
                    continue;
                };
                if !key.starts_with(&prefix) {
                    continue;
                }
                if after.as_deref().is_some_and(|after| key.as_str() <= after) {
                    continue;
                }
                keys.push(key);
            }
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(|e| StorageError::Io(io::Error::new(io::ErrorKind::Other, e)))??;

        Ok(match limit {
            Some(limit) => keys.into_iter().take(limit).collect(),
            None => keys,
        })
    }
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    Some(
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
    )
}

/// True when every key under directory `dir` sorts at or before `after`.
fn subtree_before(dir: &str, after: &str) -> bool {
    let dir_prefix = format!("{}/", dir);
    !after.starts_with(&dir_prefix) && dir_prefix.as_str() < after
}
