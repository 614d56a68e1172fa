//! Submission requests and status responses.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use validator::{Validate, ValidationError};

use crate::job::{is_safe_segment, Job, JobId};

/// Request to transcode one source into a set of resolutions.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[validate(schema(function = "validate_path_segments"))]
pub struct SubmitJob {
    /// Caller-chosen ID; generated when absent
    #[serde(default)]
    pub job_id: Option<JobId>,

    /// Network URL or local path of the source video
    #[validate(length(min = 1, message = "input_url cannot be empty"))]
    pub input_url: String,

    /// Resolution labels to produce
    #[validate(length(min = 1, message = "at least one resolution is required"))]
    pub resolutions: Vec<String>,

    /// Storage path of an uploaded source, removed after download
    #[serde(default, alias = "gcs_path")]
    pub source_path: Option<String>,

    #[serde(default)]
    pub cloud_provider: Option<String>,
}

impl SubmitJob {
    pub fn new(input_url: impl Into<String>, resolutions: Vec<String>) -> Self {
        Self {
            job_id: None,
            input_url: input_url.into(),
            resolutions,
            source_path: None,
            cloud_provider: None,
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<JobId>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }
}

/// Reject IDs and labels that cannot be used as a scratch file name.
///
/// Blank values are left to the caller: a blank ID is refused and blank
/// labels are dropped when the job is built.
fn validate_path_segments(request: &SubmitJob) -> Result<(), ValidationError> {
    let id = request
        .job_id
        .as_ref()
        .map(|id| id.as_str())
        .filter(|id| !id.trim().is_empty());
    let labels = request
        .resolutions
        .iter()
        .map(|label| label.trim())
        .filter(|label| !label.is_empty());

    for value in id.into_iter().chain(labels) {
        if !is_safe_segment(value) {
            let mut err = ValidationError::new("path_segment");
            err.message = Some(Cow::from(format!(
                "'{}' may only contain letters, digits, '.', '_' and '-'",
                value
            )));
            return Err(err);
        }
    }
    Ok(())
}

/// Accepted submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubmitResponse {
    /// Always `"queued"`
    pub status: String,
    pub job_id: JobId,
    /// 1-based position in the waiting queue at submission time
    pub position: u64,
}

impl SubmitResponse {
    pub fn queued(job_id: JobId, position: u64) -> Self {
        Self {
            status: "queued".to_string(),
            job_id,
            position,
        }
    }
}

/// One page of jobs, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobsPage {
    /// Number of jobs across all pages
    pub total: u64,
    pub jobs: Vec<Job>,
}

/// Snapshot of scheduler occupancy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueueStatus {
    pub active_jobs: u64,
    pub queued_jobs: u64,
    pub max_concurrent_jobs: u64,
    /// Job IDs in dequeue order
    pub queue_position: Vec<JobId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        let ok = SubmitJob::new("https://example.com/a.mp4", vec!["720p".to_string()]);
        assert!(ok.validate().is_ok());

        let no_resolutions = SubmitJob::new("https://example.com/a.mp4", vec![]);
        assert!(no_resolutions.validate().is_err());

        let no_input = SubmitJob::new("", vec!["720p".to_string()]);
        assert!(no_input.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_path_like_values() {
        let climbing_id = SubmitJob::new("https://example.com/a.mp4", vec!["720p".to_string()])
            .with_job_id("../../x/victim");
        assert!(climbing_id.validate().is_err());

        let climbing_label =
            SubmitJob::new("https://example.com/a.mp4", vec!["a/../../x".to_string()]);
        assert!(climbing_label.validate().is_err());

        let padded = SubmitJob::new("https://example.com/a.mp4", vec![" 720p ".to_string(), " ".to_string()])
            .with_job_id("job-1");
        assert!(padded.validate().is_ok());
    }

    #[test]
    fn test_accepts_gcs_path_alias() {
        let raw = r#"{"input_url": "u", "resolutions": ["720p"], "gcs_path": "uploads/u.mp4"}"#;
        let req: SubmitJob = serde_json::from_str(raw).unwrap();
        assert_eq!(req.source_path.as_deref(), Some("uploads/u.mp4"));
        assert!(req.job_id.is_none());
    }
}
