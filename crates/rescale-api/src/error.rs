//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use rescale_queue::QueueError;
use rescale_storage::StorageError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Queue(#[from] QueueError),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Queue(QueueError::JobNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Queue(QueueError::DuplicateJob(_) | QueueError::InvalidRequest(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Internal(_) | ApiError::Storage(_) | ApiError::Queue(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::Queue(QueueError::DuplicateJob(_)) => "Job ID already exists".to_string(),
            ApiError::Queue(QueueError::JobNotFound(id)) => format!("Job {} not found", id),
            _ => self.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let detail = if status == StatusCode::INTERNAL_SERVER_ERROR
            && std::env::var("ENVIRONMENT").unwrap_or_default() == "production"
        {
            "An internal error occurred".to_string()
        } else {
            self.detail()
        };

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "Request failed: {}", self);
        }

        (status, Json(ErrorResponse { detail })).into_response()
    }
}
