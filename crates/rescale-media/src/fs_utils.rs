//! Filesystem helpers for scratch files.

use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Deletes a scratch file when dropped.
///
/// Covers every exit path of the owner, including early returns, panics and
/// cancelled futures. A file that was never created is not an error.
#[derive(Debug)]
pub struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the file after drop.
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed scratch file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove scratch file {}: {}", self.path.display(), e),
        }
    }
}

/// Create `dir` if needed and check that files can be written in it.
pub async fn ensure_writable_dir(dir: impl AsRef<Path>) -> MediaResult<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).await?;

    let check_file = dir.join(format!(".write-check-{}", std::process::id()));
    fs::write(&check_file, b"ok").await.map_err(|e| {
        MediaError::internal(format!("{} is not writable: {}", dir.display(), e))
    })?;
    fs::remove_file(&check_file).await?;
    Ok(())
}
