//! Construction of the worker's collaborators from the environment.

use std::sync::Arc;

use tracing::{info, warn};

use rescale_media::{
    check_ffmpeg, check_ffprobe, ensure_writable_dir, FfmpegEncoder, FfprobeProber, HttpDownloader,
};
use rescale_queue::{connect_redis, JobRepository, JobStore, MemoryJobStore, MemoryWorkQueue, QueueConfig, WorkQueue};
use rescale_storage::StorageConfig;

use crate::config::WorkerConfig;
use crate::context::WorkerContext;
use crate::error::{WorkerError, WorkerResult};
use crate::retry::{retry_async, RetryConfig};

/// Where job records, the queue and the active set live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    /// Shared Redis instance; API and workers may run as separate processes
    Redis,
    /// Process-local maps; only for a single process running API and worker
    Memory,
}

impl QueueBackend {
    /// `QUEUE_BACKEND` (`redis` or `memory`), defaulting to Redis.
    pub fn from_env() -> WorkerResult<Self> {
        match std::env::var("QUEUE_BACKEND") {
            Err(_) => Ok(Self::Redis),
            Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
                "" | "redis" => Ok(Self::Redis),
                "memory" => Ok(Self::Memory),
                other => Err(WorkerError::config_error(format!(
                    "unknown QUEUE_BACKEND '{}'",
                    other
                ))),
            },
        }
    }
}

/// Connect the job store and queue, retrying Redis with backoff.
pub async fn connect_jobs(
    backend: QueueBackend,
    config: QueueConfig,
) -> WorkerResult<(Arc<dyn JobStore>, Arc<dyn WorkQueue>)> {
    match backend {
        QueueBackend::Memory => {
            warn!("Using in-memory job store; jobs are lost on restart");
            Ok((
                Arc::new(MemoryJobStore::new()),
                Arc::new(MemoryWorkQueue::new(config.max_concurrent_jobs)),
            ))
        }
        QueueBackend::Redis => {
            let retry = RetryConfig::new("redis_connect");
            let connected = retry_async(&retry, || connect_redis(config.clone())).await?;
            info!("Connected to Redis job store");
            Ok(connected)
        }
    }
}

/// Worker context backed by ffmpeg and the configured object store.
///
/// Fails when the work directory is not writable or the media tools are
/// missing.
pub async fn build_context(
    config: WorkerConfig,
    repo: Arc<JobRepository>,
    queue: Arc<dyn WorkQueue>,
) -> WorkerResult<WorkerContext> {
    ensure_writable_dir(&config.work_dir).await?;
    let ffmpeg = check_ffmpeg()?;
    let ffprobe = check_ffprobe()?;
    info!(ffmpeg = %ffmpeg.display(), ffprobe = %ffprobe.display(), "Media tools found");

    let storage_config = StorageConfig::from_env()?;
    info!(backend = storage_config.backend_name(), "Object storage configured");
    let storage = storage_config.build()?;
    let downloader =
        HttpDownloader::with_timeouts(config.download_connect_timeout, config.download_read_timeout)?;

    Ok(WorkerContext::new(
        config,
        repo,
        queue,
        storage,
        Arc::new(FfprobeProber),
        Arc::new(FfmpegEncoder),
    )
    .with_downloader(downloader))
}
