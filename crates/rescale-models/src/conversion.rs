//! Per-resolution conversion status.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Highest progress a conversion reports while its encoder is still running.
///
/// 100 is only written once the encoder has exited successfully and the
/// output has been stored.
pub const PROGRESS_CEILING: f64 = 98.0;

/// Lifecycle of one resolution within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversionState {
    /// Job is still queued
    #[default]
    Waiting,
    /// Job admitted, encode not started
    Pending,
    /// Encoder running
    Processing,
    /// Output stored
    Completed,
    /// Probe, encode or upload failed
    Failed,
    /// Target would upscale the source
    Skipped,
}

impl ConversionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionState::Waiting => "waiting",
            ConversionState::Pending => "pending",
            ConversionState::Processing => "processing",
            ConversionState::Completed => "completed",
            ConversionState::Failed => "failed",
            ConversionState::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConversionState::Completed | ConversionState::Failed | ConversionState::Skipped
        )
    }
}

impl std::fmt::Display for ConversionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one requested resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConversionStatus {
    /// Resolution label as submitted
    pub resolution: String,
    /// Current state
    #[serde(default)]
    pub status: ConversionState,
    /// Progress percentage (0-100)
    #[serde(default)]
    pub progress: f64,
    /// Fetchable reference to the output (completed only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    /// Failure cause (failed only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Informational note, e.g. why the resolution was skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ConversionStatus {
    /// Fresh status for a newly submitted resolution.
    pub fn waiting(resolution: impl Into<String>) -> Self {
        Self {
            resolution: resolution.into(),
            status: ConversionState::Waiting,
            progress: 0.0,
            output_url: None,
            error: None,
            message: None,
        }
    }

    /// Encoder running at `progress` percent (capped at [`PROGRESS_CEILING`]).
    pub fn processing(resolution: impl Into<String>, progress: f64) -> Self {
        Self {
            status: ConversionState::Processing,
            progress: progress.clamp(0.0, PROGRESS_CEILING),
            ..Self::waiting(resolution)
        }
    }

    pub fn completed(resolution: impl Into<String>, output_url: impl Into<String>) -> Self {
        Self {
            status: ConversionState::Completed,
            progress: 100.0,
            output_url: Some(output_url.into()),
            ..Self::waiting(resolution)
        }
    }

    pub fn failed(resolution: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: ConversionState::Failed,
            progress: 0.0,
            error: Some(error.into()),
            ..Self::waiting(resolution)
        }
    }

    pub fn skipped(resolution: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: ConversionState::Skipped,
            progress: 100.0,
            message: Some(message.into()),
            ..Self::waiting(resolution)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
