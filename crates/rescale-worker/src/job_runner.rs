//! Runs one admitted job to a terminal state.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn, Instrument, Span};

use rescale_media::{is_remote, TempFileGuard};
use rescale_models::{ConversionStatus, Job, JobId, JobStatus};

use crate::context::WorkerContext;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::resolution_worker::convert_resolution;

/// Process a job and release its active-set slot.
///
/// The slot is released on every exit path, including a panic while
/// processing. Errors are logged, and the job is marked failed where the
/// record still exists.
pub async fn run_job(ctx: Arc<WorkerContext>, job_id: JobId) {
    let logger = JobLogger::new(&job_id, "run");
    let span = logger.create_span();

    async {
        let outcome = AssertUnwindSafe(execute(&ctx, &job_id, &logger))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(status)) => {
                metrics::record_job_finished(status);
                logger.log_completion(status.as_str());
            }
            Ok(Err(e)) if e.is_store_inconsistency() => {
                logger.log_error(&e.to_string());
            }
            Ok(Err(e)) => {
                logger.log_error(&e.to_string());
                mark_failed(&ctx, &job_id, &e.to_string()).await;
            }
            Err(_) => {
                logger.log_error("job runner panicked");
                mark_failed(&ctx, &job_id, "Internal error: job runner panicked").await;
            }
        }

        release_slot(&ctx, &job_id).await;
    }
    .instrument(span)
    .await
}

async fn execute(ctx: &Arc<WorkerContext>, job_id: &JobId, logger: &JobLogger) -> WorkerResult<JobStatus> {
    let (started, job) = ctx
        .repo
        .update(job_id, |job| {
            if job.is_terminal() {
                return Ok(false);
            }
            job.transition(JobStatus::Processing)?;
            Ok(true)
        })
        .await
        .map_err(|e| WorkerError::from_store(job_id, e))?;

    if !started {
        logger.log_warning("job already finished");
        return Ok(job.status);
    }
    logger.log_start(&format!("input={}", job.input_url()));

    let (input, _input_guard) = match prepare_input(ctx, &job).await {
        Ok(prepared) => prepared,
        Err(e) => {
            logger.log_error(&e.to_string());
            let message = e.to_string();
            ctx.repo
                .update(job_id, |job| {
                    job.fail(message)?;
                    Ok(())
                })
                .await
                .map_err(|e| WorkerError::from_store(job_id, e))?;
            return Ok(JobStatus::Failed);
        }
    };

    let resolutions = job.unfinished_resolutions();
    let parallelism = ctx.config.resolution_parallelism(resolutions.len());
    logger.log_progress(&format!(
        "encoding {} resolution(s), {} at a time",
        resolutions.len(),
        parallelism
    ));

    let permits = Arc::new(Semaphore::new(parallelism));
    let mut tasks = JoinSet::new();
    for resolution in resolutions {
        let ctx = Arc::clone(ctx);
        let permits = Arc::clone(&permits);
        let job_id = job_id.clone();
        let input = input.clone();

        tasks.spawn(
            async move {
                let _permit = permits.acquire_owned().await.ok();
                AssertUnwindSafe(convert_resolution(&ctx, &job_id, &input, &resolution))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        warn!(job_id = %job_id, resolution = %resolution, "Resolution worker panicked");
                        ConversionStatus::failed(&resolution, "Internal error: resolution worker panicked")
                    })
            }
            .instrument(Span::current()),
        );
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => record_outcome(ctx, job_id, outcome).await?,
            Err(e) => warn!(job_id = %job_id, error = %e, "Resolution task did not finish"),
        }
    }

    let skipped_ok = ctx.config.skipped_counts_as_success;
    let (status, _) = ctx
        .repo
        .update(job_id, |job| {
            for resolution in job.unfinished_resolutions() {
                job.record_outcome(ConversionStatus::failed(resolution, "Resolution did not finish"));
            }
            let status = job.verdict(skipped_ok).unwrap_or(JobStatus::Failed);
            job.transition(status)?;
            Ok(status)
        })
        .await
        .map_err(|e| WorkerError::from_store(job_id, e))?;

    Ok(status)
}

/// Local path the encoders read from, with a guard for downloaded copies.
///
/// Remote inputs are downloaded into the work directory; the staged
/// source object, if any, is then deleted from storage.
async fn prepare_input(
    ctx: &WorkerContext,
    job: &Job,
) -> WorkerResult<(String, Option<TempFileGuard>)> {
    let url = job.input_url();
    if !is_remote(url) {
        return Ok((url.to_string(), None));
    }

    let dest = ctx.config.input_path(job.job_id.as_str())?;
    let guard = TempFileGuard::new(&dest);
    ctx.downloader.download(url, &dest).await?;

    if let Some(source_path) = &job.job_data.source_path {
        match ctx.storage.delete(source_path).await {
            Ok(()) => debug!(job_id = %job.job_id, key = %source_path, "Deleted staged source"),
            Err(e) => warn!(job_id = %job.job_id, key = %source_path, error = %e, "Failed to delete staged source"),
        }
    }

    Ok((dest.to_string_lossy().into_owned(), Some(guard)))
}

async fn record_outcome(ctx: &WorkerContext, job_id: &JobId, outcome: ConversionStatus) -> WorkerResult<()> {
    let state = outcome.status;
    let (recorded, _) = ctx
        .repo
        .update(job_id, |job| Ok(job.record_outcome(outcome)))
        .await
        .map_err(|e| WorkerError::from_store(job_id, e))?;
    if recorded {
        metrics::record_conversion(state);
    }
    Ok(())
}

async fn mark_failed(ctx: &WorkerContext, job_id: &JobId, message: &str) {
    let result = ctx
        .repo
        .update(job_id, |job| {
            if job.is_terminal() {
                return Ok(false);
            }
            job.fail(message)?;
            Ok(true)
        })
        .await;
    if let Err(e) = result {
        warn!(job_id = %job_id, error = %e, "Failed to mark job failed");
    }
}

async fn release_slot(ctx: &WorkerContext, job_id: &JobId) {
    if let Err(e) = ctx.queue.deactivate(job_id).await {
        warn!(job_id = %job_id, error = %e, "Failed to release active slot");
        return;
    }
    if let Ok(count) = ctx.queue.active_count().await {
        metrics::set_active_jobs(count as usize);
    }
}
