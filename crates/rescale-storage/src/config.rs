//! Backend selection.

use std::path::PathBuf;
use std::sync::Arc;

use crate::client::{S3Client, S3Config};
use crate::error::{StorageError, StorageResult};
use crate::local::LocalStore;
use crate::store::ObjectStore;

/// Which object store to build.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    S3(S3Config),
    Local {
        root: PathBuf,
        public_base_url: Option<String>,
    },
}

impl StorageConfig {
    /// Read `STORAGE_BACKEND` (`s3` | `local`, default `s3`) and the
    /// backend's own variables.
    pub fn from_env() -> StorageResult<Self> {
        let backend = std::env::var("STORAGE_BACKEND").unwrap_or_else(|_| "s3".to_string());
        match backend.to_ascii_lowercase().as_str() {
            "s3" => Ok(Self::S3(S3Config::from_env()?)),
            "local" => Ok(Self::Local {
                root: std::env::var("LOCAL_STORAGE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| std::env::temp_dir().join("rescale-storage")),
                public_base_url: std::env::var("LOCAL_STORAGE_PUBLIC_URL")
                    .ok()
                    .filter(|s| !s.is_empty()),
            }),
            other => Err(StorageError::config_error(format!(
                "unknown STORAGE_BACKEND '{}'",
                other
            ))),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            StorageConfig::S3(_) => "s3",
            StorageConfig::Local { .. } => "local",
        }
    }

    /// Build the configured store.
    pub fn build(self) -> StorageResult<Arc<dyn ObjectStore>> {
        match self {
            StorageConfig::S3(config) => Ok(Arc::new(S3Client::new(config))),
            StorageConfig::Local {
                root,
                public_base_url,
            } => {
                let mut store = LocalStore::new(root);
                if let Some(base) = public_base_url {
                    store = store.with_public_base_url(&base)?;
                }
                Ok(Arc::new(store))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_local() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig::Local {
            root: dir.path().to_path_buf(),
            public_base_url: Some("http://localhost:8080/files".to_string()),
        };
        assert_eq!(config.backend_name(), "local");
        assert!(config.build().is_ok());
    }

    #[test]
    fn test_build_local_rejects_bad_url() {
        let config = StorageConfig::Local {
            root: PathBuf::from("/tmp"),
            public_base_url: Some("not a url".to_string()),
        };
        assert!(matches!(config.build(), Err(StorageError::ConfigError(_))));
    }
}
