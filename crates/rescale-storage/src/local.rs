//! Local filesystem store for development and single-host deployments.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::debug;
use url::Url;

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_key, ObjectStore};

/// Stores objects as files under a root directory.
///
/// Fetchable URLs are `{public_base_url}/{key}` when a base URL is set,
/// `file://` URLs otherwise. The TTL is not enforced.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    public_base_url: Option<Url>,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base_url: None,
        }
    }

    pub fn with_public_base_url(mut self, base: &str) -> StorageResult<Self> {
        let mut url = Url::parse(base)
            .map_err(|e| StorageError::config_error(format!("invalid base URL {}: {}", base, e)))?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        self.public_base_url = Some(url);
        Ok(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn upload(&self, local: &Path, key: &str) -> StorageResult<()> {
        let dest = self.path_for(key)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(local, &dest)
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", local.display(), e)))?;
        debug!("Stored {} at {}", local.display(), dest.display());
        Ok(())
    }

    async fn fetchable_url(&self, key: &str, _ttl: Duration) -> StorageResult<String> {
        let path = self.path_for(key)?;
        match &self.public_base_url {
            Some(base) => base
                .join(key)
                .map(|u| u.to_string())
                .map_err(|e| StorageError::InvalidKey(format!("{}: {}", key, e))),
            None => {
                let absolute = std::path::absolute(&path)?;
                Url::from_file_path(&absolute)
                    .map(|u| u.to_string())
                    .map_err(|_| StorageError::InvalidKey(key.to_string()))
            }
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::delete_failed(format!("{}: {}", key, e))),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        Ok(fs::try_exists(&path).await?)
    }
}
