//! Transcode job records.
//!
//! A [`Job`] is the unit stored under `job:{id}`. Its JSON layout matches
//! the records written by earlier deployments, so existing jobs stay
//! readable.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::conversion::{ConversionState, ConversionStatus, PROGRESS_CEILING};
use crate::timestamp;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// True when `value` is usable as a single file-name component.
///
/// Job IDs and resolution labels end up in scratch file names, so only
/// ASCII letters, digits, `.`, `_` and `-` are allowed, and `.`/`..` are
/// rejected.
pub fn is_safe_segment(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 128
        && value != "."
        && value != ".."
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// Job-level status.
///
/// `waiting -> pending -> processing -> {completed | failed}`. A job that
/// never reached processing may also fail directly from pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, not yet admitted
    #[default]
    Waiting,
    /// Admitted into the active set
    Pending,
    /// Fan-out in progress
    Processing,
    /// Every resolution succeeded
    Completed,
    /// At least one resolution, or the job itself, failed
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Re-entering pending or processing is allowed so that a job recovered
    /// after a crash can be dispatched again.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Waiting, Pending)
                | (Pending, Pending)
                | (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected job status change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid job transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Submission payload kept on the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobData {
    /// Network URL or local path of the source video
    pub input_url: String,
    /// Requested resolution labels, in submission order
    pub resolutions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    /// Storage path of an uploaded source, removed once downloaded
    #[serde(default, rename = "gcs_path", skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_provider: Option<String>,
}

/// A transcode job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub job_id: JobId,

    #[serde(default)]
    pub status: JobStatus,

    #[serde(with = "crate::timestamp::iso8601")]
    #[schemars(with = "DateTime<Utc>")]
    pub started_at: DateTime<Utc>,

    #[serde(
        default,
        with = "crate::timestamp::iso8601_option",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<DateTime<Utc>>")]
    pub completed_at: Option<DateTime<Utc>>,

    /// One entry per requested resolution, keyed by label
    #[serde(default)]
    pub conversions: BTreeMap<String, ConversionStatus>,

    pub job_data: JobData,

    /// Mean progress over all conversions
    #[serde(default)]
    pub progress: f64,

    /// Job-level failure (download, missing record); resolution failures
    /// live on their conversion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    /// Create a waiting job. Duplicate labels keep their first occurrence.
    pub fn new(job_id: JobId, input_url: impl Into<String>, resolutions: Vec<String>) -> Self {
        let mut ordered: Vec<String> = Vec::with_capacity(resolutions.len());
        for label in resolutions {
            let label = label.trim().to_string();
            if !label.is_empty() && !ordered.contains(&label) {
                ordered.push(label);
            }
        }

        let conversions = ordered
            .iter()
            .map(|label| (label.clone(), ConversionStatus::waiting(label.clone())))
            .collect();

        Self {
            job_id: job_id.clone(),
            status: JobStatus::Waiting,
            started_at: timestamp::now(),
            completed_at: None,
            conversions,
            job_data: JobData {
                input_url: input_url.into(),
                resolutions: ordered,
                job_id: Some(job_id),
                source_path: None,
                cloud_provider: None,
            },
            progress: 0.0,
            error: None,
        }
    }

    /// Set the storage path of an uploaded source.
    pub fn with_source_path(mut self, path: Option<String>) -> Self {
        self.job_data.source_path = path;
        self
    }

    /// Set the cloud provider tag.
    pub fn with_cloud_provider(mut self, provider: Option<String>) -> Self {
        self.job_data.cloud_provider = provider;
        self
    }

    pub fn input_url(&self) -> &str {
        &self.job_data.input_url
    }

    pub fn resolutions(&self) -> &[String] {
        &self.job_data.resolutions
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, refusing illegal transitions.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(timestamp::now());
        }
        Ok(())
    }

    /// Mark admitted: job pending, every non-terminal conversion pending.
    pub fn admit(&mut self) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Pending)?;
        for conversion in self.conversions.values_mut() {
            if !conversion.is_terminal() {
                conversion.status = ConversionState::Pending;
            }
        }
        Ok(())
    }

    /// Fail the whole job with a job-level error.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Record encoder progress for a resolution.
    ///
    /// Progress never decreases and stays below 100 while processing.
    /// Returns false when the label is unknown or already terminal.
    pub fn record_progress(&mut self, resolution: &str, percent: f64) -> bool {
        let Some(conversion) = self.conversions.get_mut(resolution) else {
            return false;
        };
        if conversion.is_terminal() {
            return false;
        }
        conversion.status = ConversionState::Processing;
        conversion.progress = percent.min(PROGRESS_CEILING).max(conversion.progress);
        self.recompute_progress();
        true
    }

    /// Store the terminal outcome of a resolution.
    ///
    /// Only known labels are accepted, so the conversion key set never
    /// drifts from the requested resolutions; a conversion becomes terminal
    /// at most once.
    pub fn record_outcome(&mut self, outcome: ConversionStatus) -> bool {
        let Some(conversion) = self.conversions.get_mut(&outcome.resolution) else {
            return false;
        };
        if conversion.is_terminal() || !outcome.is_terminal() {
            return false;
        }
        *conversion = outcome;
        self.recompute_progress();
        true
    }

    /// Labels whose conversion has not reached a terminal state.
    pub fn unfinished_resolutions(&self) -> Vec<String> {
        self.job_data
            .resolutions
            .iter()
            .filter(|label| {
                self.conversions
                    .get(label.as_str())
                    .map(|c| !c.is_terminal())
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    /// Job verdict once every conversion is terminal.
    ///
    /// Completed iff every conversion completed, with skipped conversions
    /// counted as success when `skipped_counts_as_success` is set. Returns
    /// `None` while any conversion is still running.
    pub fn verdict(&self, skipped_counts_as_success: bool) -> Option<JobStatus> {
        if self.conversions.values().any(|c| !c.is_terminal()) {
            return None;
        }
        let all_ok = self.conversions.values().all(|c| match c.status {
            ConversionState::Completed => true,
            ConversionState::Skipped => skipped_counts_as_success,
            _ => false,
        });
        Some(if all_ok {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        })
    }

    fn recompute_progress(&mut self) {
        if self.conversions.is_empty() {
            self.progress = 0.0;
            return;
        }
        let total: f64 = self.conversions.values().map(|c| c.progress).sum();
        self.progress = total / self.conversions.len() as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn job(resolutions: &[&str]) -> Job {
        Job::new(
            JobId::from("j1"),
            "https://example.com/in.mp4",
            resolutions.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn key_set(job: &Job) -> BTreeSet<String> {
        job.conversions.keys().cloned().collect()
    }

    fn requested(job: &Job) -> BTreeSet<String> {
        job.resolutions().iter().cloned().collect()
    }

    #[test]
    fn test_new_job_has_one_conversion_per_resolution() {
        let job = job(&["720p", "1080p", "720p", " "]);
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.resolutions(), &["720p".to_string(), "1080p".to_string()]);
        assert_eq!(key_set(&job), requested(&job));
        assert!(job
            .conversions
            .values()
            .all(|c| c.status == ConversionState::Waiting && c.progress == 0.0));
    }

    #[test]
    fn test_safe_segment() {
        for ok in ["j1", "4K", "720p", "legacy-1", "a.b_c", "0b9d2c1e-5f3a-4c39-9d0e-2f1f6c7a1b00"] {
            assert!(is_safe_segment(ok), "{} should be accepted", ok);
        }
        for bad in ["", ".", "..", "../../x/victim", "a/../../x", "a\\b", "with space", "x\0"] {
            assert!(!is_safe_segment(bad), "{:?} should be rejected", bad);
        }
        assert!(!is_safe_segment(&"a".repeat(129)));
    }

    #[test]
    fn test_state_machine() {
        let mut job = job(&["720p"]);
        assert!(job.transition(JobStatus::Processing).is_err());
        job.admit().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.conversions["720p"].status, ConversionState::Pending);

        job.transition(JobStatus::Processing).unwrap();
        job.transition(JobStatus::Completed).unwrap();
        assert!(job.completed_at.is_some());

        // Terminal states are never left
        assert!(job.transition(JobStatus::Processing).is_err());
        assert!(job.transition(JobStatus::Failed).is_err());
    }

    #[test]
    fn test_progress_is_monotonic_and_capped() {
        let mut job = job(&["720p", "1080p"]);
        assert!(job.record_progress("720p", 40.0));
        assert!(job.record_progress("720p", 20.0));
        assert_eq!(job.conversions["720p"].progress, 40.0);
        assert!(job.record_progress("720p", 100.0));
        assert_eq!(job.conversions["720p"].progress, PROGRESS_CEILING);
        assert_eq!(job.progress, PROGRESS_CEILING / 2.0);
        assert!(!job.record_progress("4K", 10.0));
    }

    #[test]
    fn test_outcome_rules() {
        let mut job = job(&["720p", "1080p"]);

        // Unknown label never adds a key
        assert!(!job.record_outcome(ConversionStatus::completed("4K", "u")));
        assert_eq!(key_set(&job), requested(&job));

        // Non-terminal outcomes are not outcomes
        assert!(!job.record_outcome(ConversionStatus::processing("720p", 10.0)));

        assert!(job.record_outcome(ConversionStatus::completed("720p", "u1")));
        // Terminal exactly once
        assert!(!job.record_outcome(ConversionStatus::failed("720p", "late")));
        assert_eq!(job.conversions["720p"].output_url.as_deref(), Some("u1"));
        // Progress updates after terminal are ignored
        assert!(!job.record_progress("720p", 5.0));

        assert_eq!(job.unfinished_resolutions(), vec!["1080p".to_string()]);
    }

    #[test]
    fn test_verdict() {
        let mut job = job(&["720p", "1080p", "4K"]);
        assert_eq!(job.verdict(true), None);

        job.record_outcome(ConversionStatus::completed("720p", "a"));
        job.record_outcome(ConversionStatus::completed("1080p", "b"));
        job.record_outcome(ConversionStatus::skipped("4K", "upscale"));
        assert_eq!(job.verdict(true), Some(JobStatus::Completed));
        assert_eq!(job.verdict(false), Some(JobStatus::Failed));

        let mut failing = self::job(&["720p", "1080p"]);
        failing.record_outcome(ConversionStatus::completed("720p", "a"));
        failing.record_outcome(ConversionStatus::failed("1080p", "exit 1"));
        assert_eq!(failing.verdict(true), Some(JobStatus::Failed));
    }

    #[test]
    fn test_record_round_trip_keeps_legacy_keys() {
        let job = job(&["720p"]).with_source_path(Some("uploads/a.mp4".to_string()));
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], "waiting");
        assert_eq!(json["job_data"]["gcs_path"], "uploads/a.mp4");
        assert!(json.get("completed_at").is_none());

        let back: Job = serde_json::from_value(json).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn test_reads_record_from_previous_deployment() {
        let raw = r#"{
            "job_id": "legacy-1",
            "status": "completed",
            "started_at": "2024-05-02T09:12:44.512312",
            "completed_at": "2024-05-02T09:20:01.000001",
            "conversions": {
                "720p": {"resolution": "720p", "status": "completed", "progress": 100,
                         "output_url": "https://storage/processed/legacy-1/720p.mp4"}
            },
            "job_data": {"input_url": "https://example.com/v.mp4",
                         "resolutions": ["720p"], "job_id": "legacy-1"},
            "progress": 100.0
        }"#;
        let job: Job = serde_json::from_str(raw).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
        assert_eq!(job.conversions["720p"].status, ConversionState::Completed);
    }
}
