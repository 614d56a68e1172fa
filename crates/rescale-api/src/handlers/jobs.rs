//! Job submission and status handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use rescale_models::{Job, JobId, JobsPage, QueueStatus, SubmitJob, SubmitResponse};

use crate::error::ApiResult;
use crate::metrics;
use crate::state::AppState;

/// Pagination for the job list.
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

/// Queue a job for every requested resolution.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJob>,
) -> ApiResult<Json<SubmitResponse>> {
    let response = state.jobs.submit(request).await?;
    metrics::record_job_submitted();
    Ok(Json(response))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    let job = state.jobs.get_status(&JobId::from(job_id)).await?;
    Ok(Json(job))
}

/// Jobs newest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<JobsPage>> {
    let page = state.jobs.list_jobs(query.skip, query.limit).await?;
    Ok(Json(page))
}

pub async fn get_queue_status(State(state): State<AppState>) -> ApiResult<Json<QueueStatus>> {
    let status = state.jobs.queue_status().await?;
    metrics::set_queue_length(status.queued_jobs);
    Ok(Json(status))
}
