//! Flat key/document storage.
//!
//! The object-store backend needs only point reads, overwrites, prefix
//! listing and one create-only write. Keys are `/`-separated relative paths.

mod fs;
mod memory;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;

/// A flat key/value document store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Unconditional write.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    /// Writes only if `key` does not exist. Returns `false`, writing nothing,
    /// when it does. Equivalent to an `If-None-Match: *` conditional put.
    async fn put_if_absent(&self, key: &str, bytes: Vec<u8>) -> Result<bool, StorageError>;

    /// Keys starting with `prefix` and sorting after `start_after`, in
    /// ascending order, at most `limit`. Same contract as a `StartAfter` /
    /// `MaxKeys` list request.
    async fn list_page(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<String>, StorageError>;

    /// Keys starting with `prefix`, in ascending order, at most `limit`.
    async fn list(&self, prefix: &str, limit: Option<usize>) -> Result<Vec<String>, StorageError> {
        self.list_page(prefix, None, limit).await
    }
}

/// Rejects keys that could escape a filesystem root or alias another key.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::corrupt_key(key, "empty key"));
    }
    if key.starts_with('/') || key.ends_with('/') {
        return Err(StorageError::corrupt_key(key, "leading or trailing '/'"));
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(StorageError::corrupt_key(key, "empty or relative segment"));
        }
    }
    Ok(())
}

pub async fn get_json<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn ObjectStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    store.put(key, serde_json::to_vec_pretty(value)?).await
}

pub async fn put_json_if_absent<T: Serialize + ?Sized>(
    store: &dyn ObjectStore,
    key: &str,
    value: &T,
) -> Result<bool, StorageError> {
    store.put_if_absent(key, serde_json::to_vec_pretty(value)?).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        validate_key("projects/p1/entities/b1/metadata.json").unwrap();
        for bad in ["", "/abs", "trailing/", "a//b", "a/../b", "./a"] {
            assert!(validate_key(bad).is_err(), "{:?} should be rejected", bad);
        }
    }
}
