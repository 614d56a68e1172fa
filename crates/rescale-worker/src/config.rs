//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rescale_models::{is_safe_segment, EncodingConfig};

use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs (size of the active set)
    pub max_concurrent_jobs: usize,
    /// Upper bound on resolutions encoded in parallel within one job
    pub max_resolution_parallel: usize,
    /// Work directory for downloaded inputs and encoded outputs
    pub work_dir: PathBuf,
    /// Minimum time between persisted progress updates per resolution
    pub progress_interval: Duration,
    /// Blocking dequeue timeout; bounds shutdown latency
    pub poll_timeout: Duration,
    /// How often stale active-set entries are purged
    pub reconcile_interval: Duration,
    /// Grace period for in-flight jobs after a shutdown signal
    pub shutdown_timeout: Duration,
    /// Per-resolution encoder deadline
    pub encode_timeout: Option<Duration>,
    /// Limit on establishing the connection for a remote source
    pub download_connect_timeout: Duration,
    /// Limit on a single stalled read while downloading a remote source
    pub download_read_timeout: Duration,
    /// Skip resolutions larger than the source instead of upscaling
    pub skip_upscale: bool,
    /// Count skipped resolutions as successful in the job verdict
    pub skipped_counts_as_success: bool,
    /// Lifetime of output URLs written to job records
    pub output_url_ttl: Duration,
    /// Encoder settings shared by every resolution
    pub encoding: EncodingConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            max_resolution_parallel: 4,
            work_dir: std::env::temp_dir().join("video-processor"),
            progress_interval: Duration::from_secs(2),
            poll_timeout: Duration::from_secs(1),
            reconcile_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(60),
            encode_timeout: None,
            download_connect_timeout: Duration::from_secs(10),
            download_read_timeout: Duration::from_secs(60),
            skip_upscale: true,
            skipped_counts_as_success: true,
            output_url_ttl: Duration::from_secs(300),
            encoding: EncodingConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    ///
    /// Unset or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_parse("MAX_CONCURRENT_JOBS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            max_resolution_parallel: env_parse("WORKER_MAX_RESOLUTION_PARALLEL")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_resolution_parallel),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            progress_interval: env_parse("WORKER_PROGRESS_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.progress_interval),
            poll_timeout: env_parse("WORKER_POLL_TIMEOUT_SECS")
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_timeout),
            reconcile_interval: env_parse("WORKER_RECONCILE_INTERVAL_SECS")
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconcile_interval),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            encode_timeout: env_parse("WORKER_ENCODE_TIMEOUT_SECS")
                .filter(|n| *n > 0)
                .map(Duration::from_secs),
            download_connect_timeout: env_parse("WORKER_DOWNLOAD_CONNECT_TIMEOUT_SECS")
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.download_connect_timeout),
            download_read_timeout: env_parse("WORKER_DOWNLOAD_READ_TIMEOUT_SECS")
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.download_read_timeout),
            skip_upscale: env_bool("WORKER_SKIP_UPSCALE").unwrap_or(defaults.skip_upscale),
            skipped_counts_as_success: env_bool("WORKER_SKIPPED_COUNTS_AS_SUCCESS")
                .unwrap_or(defaults.skipped_counts_as_success),
            output_url_ttl: env_parse("OUTPUT_URL_TTL_SECS")
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.output_url_ttl),
            encoding: defaults.encoding,
        }
    }

    /// Number of resolutions of one job encoded at the same time.
    ///
    /// `min(resolutions, max(1, cpus / 2), max_resolution_parallel)`, never
    /// below one.
    pub fn resolution_parallelism(&self, resolutions: usize) -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        resolutions
            .min((cpus / 2).max(1))
            .min(self.max_resolution_parallel)
            .max(1)
    }

    /// Local path of a job's downloaded input.
    pub fn input_path(&self, job_id: &str) -> WorkerResult<PathBuf> {
        self.scratch_path(&[job_id], "input")
    }

    /// Local path of one encoded resolution before upload.
    pub fn output_path(&self, job_id: &str, resolution: &str) -> WorkerResult<PathBuf> {
        self.scratch_path(&[job_id, resolution], resolution)
    }

    /// `{work_dir}/{job_id}_{suffix}.mp4`, refusing any part that could
    /// leave the work directory.
    fn scratch_path(&self, parts: &[&str], suffix: &str) -> WorkerResult<PathBuf> {
        if let Some(bad) = parts.iter().find(|part| !is_safe_segment(part)) {
            return Err(WorkerError::UnsafePath(bad.to_string()));
        }
        let path = self.work_dir.join(format!("{}_{}.mp4", parts[0], suffix));
        if path.parent() != Some(self.work_dir.as_path()) {
            return Err(WorkerError::UnsafePath(path.display().to_string()));
        }
        Ok(path)
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
