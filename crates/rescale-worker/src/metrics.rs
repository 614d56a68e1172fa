//! Prometheus metrics recorded by the worker.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use rescale_models::{ConversionState, JobStatus};

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_TOTAL: &str = "rescale_jobs_total";
    pub const CONVERSIONS_TOTAL: &str = "rescale_conversions_total";
    pub const ENCODE_DURATION_SECONDS: &str = "rescale_encode_duration_seconds";
    pub const ACTIVE_JOBS: &str = "rescale_active_jobs";
}

/// Serve metrics on `addr` from a background listener.
pub fn install_exporter(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

/// Record a job reaching a terminal state.
pub fn record_job_finished(status: JobStatus) {
    let labels = [("status", status.as_str().to_string())];
    counter!(names::JOBS_TOTAL, &labels).increment(1);
}

/// Record a resolution reaching a terminal state.
pub fn record_conversion(state: ConversionState) {
    let labels = [("status", state.as_str().to_string())];
    counter!(names::CONVERSIONS_TOTAL, &labels).increment(1);
}

/// Record wall time of one successful encode.
pub fn record_encode_duration(resolution: &str, duration_secs: f64) {
    let labels = [("resolution", resolution.to_string())];
    histogram!(names::ENCODE_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn set_active_jobs(count: usize) {
    gauge!(names::ACTIVE_JOBS).set(count as f64);
}
