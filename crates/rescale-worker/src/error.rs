//! Worker error types.

use thiserror::Error;

use rescale_models::JobId;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// The job record vanished while the job was being processed.
    #[error("Job record missing for active job {0}")]
    StoreInconsistency(JobId),

    /// A job ID or label that would place a scratch file outside the work
    /// directory.
    #[error("Unsafe scratch file name: {0}")]
    UnsafePath(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rescale_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] rescale_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] rescale_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Missing-record errors from the store become `StoreInconsistency`.
    pub fn from_store(id: &JobId, err: rescale_queue::QueueError) -> Self {
        if err.is_not_found() {
            Self::StoreInconsistency(id.clone())
        } else {
            Self::Queue(err)
        }
    }

    pub fn is_store_inconsistency(&self) -> bool {
        matches!(self, WorkerError::StoreInconsistency(_))
    }

    /// Text stored in a failed conversion's `error` field.
    pub fn summary(&self) -> String {
        match self {
            WorkerError::Media(e) => e.summary(),
            other => other.to_string(),
        }
    }
}
