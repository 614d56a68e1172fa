//! Submission and status operations used by the HTTP layer.

use std::sync::Arc;

use tracing::{info, warn};
use validator::Validate;

use rescale_models::{Job, JobId, JobsPage, QueueStatus, SubmitJob, SubmitResponse};

use crate::error::{QueueError, QueueResult};
use crate::queue::WorkQueue;
use crate::repository::JobRepository;

/// Entry point for submitters.
#[derive(Clone)]
pub struct JobService {
    repo: Arc<JobRepository>,
    queue: Arc<dyn WorkQueue>,
}

impl JobService {
    pub fn new(repo: Arc<JobRepository>, queue: Arc<dyn WorkQueue>) -> Self {
        Self { repo, queue }
    }

    pub fn repository(&self) -> &Arc<JobRepository> {
        &self.repo
    }

    pub fn queue(&self) -> &Arc<dyn WorkQueue> {
        &self.queue
    }

    /// Store a waiting job and append it to the queue.
    ///
    /// A reused ID fails with [`QueueError::DuplicateJob`] and leaves the
    /// existing record untouched.
    pub async fn submit(&self, request: SubmitJob) -> QueueResult<SubmitResponse> {
        request
            .validate()
            .map_err(|e| QueueError::invalid_request(e.to_string()))?;

        let job_id = match request.job_id {
            Some(id) if !id.as_str().trim().is_empty() => id,
            Some(_) => return Err(QueueError::invalid_request("job_id cannot be blank")),
            None => JobId::new(),
        };

        let job = Job::new(job_id.clone(), request.input_url, request.resolutions)
            .with_source_path(request.source_path)
            .with_cloud_provider(request.cloud_provider);
        if job.resolutions().is_empty() {
            return Err(QueueError::invalid_request("at least one resolution is required"));
        }

        self.repo.insert(&job).await.inspect_err(|e| {
            if matches!(e, QueueError::DuplicateJob(_)) {
                warn!(job_id = %job_id, "Duplicate job rejected");
            }
        })?;

        let position = self.queue.enqueue(&job_id).await?;
        info!(
            job_id = %job_id,
            resolutions = ?job.resolutions(),
            position,
            "Job queued"
        );

        Ok(SubmitResponse::queued(job_id, position))
    }

    pub async fn get_status(&self, id: &JobId) -> QueueResult<Job> {
        self.repo.get(id).await
    }

    /// One page of jobs sorted by `started_at`, newest first.
    pub async fn list_jobs(&self, offset: usize, limit: usize) -> QueueResult<JobsPage> {
        let mut jobs = self.repo.load_all().await?;
        jobs.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });

        let total = jobs.len() as u64;
        let jobs = jobs.into_iter().skip(offset).take(limit).collect();
        Ok(JobsPage { total, jobs })
    }

    pub async fn queue_status(&self) -> QueueResult<QueueStatus> {
        let queue_position = self.queue.queued_ids().await?;
        Ok(QueueStatus {
            active_jobs: self.queue.active_count().await?,
            queued_jobs: queue_position.len() as u64,
            max_concurrent_jobs: self.queue.max_active(),
            queue_position,
        })
    }
}
