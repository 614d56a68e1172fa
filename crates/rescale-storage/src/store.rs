//! Object storage contract.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::error::{StorageError, StorageResult};

/// Narrow object-storage contract used by the worker and the API.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store the bytes of a local file at `key`, replacing any existing object.
    async fn upload(&self, local: &Path, key: &str) -> StorageResult<()>;

    /// URL from which `key` can be fetched for `ttl`.
    async fn fetchable_url(&self, key: &str, ttl: Duration) -> StorageResult<String>;

    /// Remove `key`. Removing a missing object succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;
}

/// Reject keys that are empty, absolute or escape their prefix.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    if key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..") {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
