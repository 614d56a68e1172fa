//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Download failed: {message}")]
    DownloadFailed { message: String },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Output file not created: {0}")]
    OutputMissing(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create a download failure error.
    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Short text suitable for a conversion's `error` field.
    ///
    /// FFmpeg failures include the last stderr line when one was captured.
    pub fn summary(&self) -> String {
        match self {
            MediaError::FfmpegFailed {
                message,
                stderr: Some(stderr),
                exit_code,
            } => {
                let last = stderr.lines().rev().find(|l| !l.trim().is_empty());
                match (exit_code, last) {
                    (Some(code), Some(line)) => format!("{} (exit {}): {}", message, code, line.trim()),
                    (None, Some(line)) => format!("{}: {}", message, line.trim()),
                    (Some(code), None) => format!("{} (exit {})", message, code),
                    (None, None) => message.clone(),
                }
            }
            MediaError::FfmpegFailed {
                message,
                exit_code: Some(code),
                ..
            } => format!("{} (exit {})", message, code),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for MediaError {
    fn from(e: reqwest::Error) -> Self {
        Self::download_failed(e.to_string())
    }
}
