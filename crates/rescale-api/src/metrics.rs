//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

use crate::error::{ApiError, ApiResult};

/// Install the global Prometheus recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> ApiResult<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ApiError::internal(format!("failed to install Prometheus recorder: {}", e)))
}

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "rescale_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "rescale_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "rescale_http_requests_in_flight";

    pub const JOBS_SUBMITTED_TOTAL: &str = "rescale_jobs_submitted_total";
    pub const QUEUE_LENGTH: &str = "rescale_queue_length";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, route: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", route.to_string()),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record an accepted submission.
pub fn record_job_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

/// Update queue length gauge.
pub fn set_queue_length(length: u64) {
    gauge!(names::QUEUE_LENGTH).set(length as f64);
}

/// Metrics middleware for HTTP requests.
///
/// Installed as a route layer so that requests are labelled by route
/// template (`/jobs/:job_id`) and job IDs never become label values.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(&method, &route, response.status().as_u16(), start.elapsed().as_secs_f64());

    response
}
