//! Queue error types.

use rescale_models::InvalidTransition;
use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Job ID already exists: {0}")]
    DuplicateJob(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn not_found(job_id: impl std::fmt::Display) -> Self {
        Self::JobNotFound(job_id.to_string())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::JobNotFound(_))
    }
}
