//! Probe, encode and publish one resolution of a job.

use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use rescale_media::{EncodeRequest, FfmpegProgress, ProgressCallback, ProgressMonitor, TempFileGuard};
use rescale_models::{ConversionStatus, JobId, Resolution};
use rescale_storage::publish_output;

use crate::context::WorkerContext;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

/// Produce the terminal outcome of one resolution.
///
/// Never returns an error: probe, encode and upload failures become a
/// failed conversion carrying the error text. The encoded file is removed
/// on every exit path, including cancellation of this future.
pub async fn convert_resolution(
    ctx: &WorkerContext,
    job_id: &JobId,
    input: &str,
    resolution: &str,
) -> ConversionStatus {
    match try_convert(ctx, job_id, input, resolution).await {
        Ok(outcome) => {
            info!(
                job_id = %job_id,
                resolution,
                status = %outcome.status.as_str(),
                "Resolution finished"
            );
            outcome
        }
        Err(e) => {
            warn!(job_id = %job_id, resolution, error = %e, "Resolution failed");
            ConversionStatus::failed(resolution, e.summary())
        }
    }
}

async fn try_convert(
    ctx: &WorkerContext,
    job_id: &JobId,
    input: &str,
    resolution: &str,
) -> WorkerResult<ConversionStatus> {
    let info = ctx.prober.probe(input).await?;
    let source = info.dimensions();
    let target = Resolution::resolve(resolution);
    debug!(job_id = %job_id, resolution, %source, %target, duration = info.duration, "Probed source");

    if ctx.config.skip_upscale && target.exceeds(&source) {
        info!(job_id = %job_id, resolution, %source, %target, "Skipping upscale");
        return Ok(ConversionStatus::skipped(
            resolution,
            format!(
                "Skipped: target {} is larger than source {}",
                target, source
            ),
        ));
    }

    let output = ctx.config.output_path(job_id.as_str(), resolution)?;
    let _output_guard = TempFileGuard::new(&output);

    ctx.repo
        .update(job_id, |job| Ok(job.record_progress(resolution, 0.0)))
        .await
        .map_err(|e| WorkerError::from_store(job_id, e))?;

    let request = EncodeRequest {
        encoding: ctx.config.encoding.clone(),
        ..EncodeRequest::new(input, &output, target)
    }
    .with_timeout(ctx.config.encode_timeout.map(|d| d.as_secs()))
    .with_cancel(ctx.cancel_signal());

    let (elapsed_tx, mut elapsed_rx) = mpsc::unbounded_channel::<f64>();
    let on_progress: ProgressCallback = Box::new(move |progress: FfmpegProgress| {
        if let Some(secs) = progress.elapsed_secs() {
            let _ = elapsed_tx.send(secs);
        }
    });

    // Ends when the encoder drops the callback
    let track_progress = async {
        let mut monitor = ProgressMonitor::new(info.duration, ctx.config.progress_interval);
        while let Some(elapsed) = elapsed_rx.recv().await {
            if let Some(percent) = monitor.observe(elapsed) {
                persist_progress(ctx, job_id, resolution, percent).await;
            }
        }
    };

    let started = Instant::now();
    let (encoded, ()) = tokio::join!(ctx.encoder.encode(request, on_progress), track_progress);
    encoded?;
    metrics::record_encode_duration(resolution, started.elapsed().as_secs_f64());

    let url = publish_output(
        ctx.storage.as_ref(),
        &output,
        job_id.as_str(),
        resolution,
        ctx.config.output_url_ttl,
    )
    .await?;

    Ok(ConversionStatus::completed(resolution, url))
}

async fn persist_progress(ctx: &WorkerContext, job_id: &JobId, resolution: &str, percent: f64) {
    match ctx
        .repo
        .update(job_id, |job| Ok(job.record_progress(resolution, percent)))
        .await
    {
        Ok((true, _)) => debug!(job_id = %job_id, resolution, percent, "Progress saved"),
        Ok((false, _)) => {}
        Err(e) => warn!(job_id = %job_id, resolution, error = %e, "Failed to save progress"),
    }
}
