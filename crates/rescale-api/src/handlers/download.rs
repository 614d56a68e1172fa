//! Redirects to transcoded outputs.

use axum::extract::{Path, State};
use axum::response::Redirect;
use tracing::debug;

use rescale_models::{ConversionState, JobId};
use rescale_storage::output_key;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Redirect (307) to a freshly signed URL for a completed resolution.
///
/// A new URL is produced on every call; the one stored on the conversion
/// may already have expired.
pub async fn download_output(
    State(state): State<AppState>,
    Path((job_id, resolution)): Path<(String, String)>,
) -> ApiResult<Redirect> {
    let job = state
        .jobs
        .get_status(&JobId::from(job_id))
        .await
        .map_err(|e| {
            if e.is_not_found() {
                ApiError::not_found("Job not found")
            } else {
                e.into()
            }
        })?;

    let conversion = job
        .conversions
        .get(&resolution)
        .ok_or_else(|| ApiError::not_found("Resolution not found"))?;
    if conversion.status != ConversionState::Completed {
        return Err(ApiError::bad_request("Video conversion not completed"));
    }

    let key = output_key(job.job_id.as_str(), &resolution);
    if !state.storage.exists(&key).await? {
        return Err(ApiError::not_found("Video file not found"));
    }

    let url = state
        .storage
        .fetchable_url(&key, state.config.download_url_ttl)
        .await?;
    debug!(job_id = %job.job_id, resolution = %resolution, "Redirecting to output");
    Ok(Redirect::temporary(&url))
}
