//! Queue configuration.

/// Queue configuration.
///
/// Key names default to the ones used by earlier deployments so a new worker
/// can take over an existing Redis database.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// List holding waiting job IDs
    pub queue_key: String,
    /// Set holding active job IDs
    pub active_set_key: String,
    /// Prefix of job record keys
    pub job_key_prefix: String,
    /// Active set capacity
    pub max_concurrent_jobs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            queue_key: "job_queue".to_string(),
            active_set_key: "active_jobs".to_string(),
            job_key_prefix: "job:".to_string(),
            max_concurrent_jobs: 2,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            queue_key: std::env::var("QUEUE_KEY").unwrap_or(defaults.queue_key),
            active_set_key: std::env::var("ACTIVE_SET_KEY").unwrap_or(defaults.active_set_key),
            job_key_prefix: std::env::var("JOB_KEY_PREFIX").unwrap_or(defaults.job_key_prefix),
            max_concurrent_jobs: std::env::var("MAX_CONCURRENT_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
        }
    }

    /// Record key for a job.
    pub fn job_key(&self, job_id: &str) -> String {
        format!("{}{}", self.job_key_prefix, job_id)
    }
}
