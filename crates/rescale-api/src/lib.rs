//! Axum HTTP API for the transcoding service.
//!
//! This crate provides:
//! - Job submission, status, listing and queue introspection
//! - Download redirects to freshly signed output URLs
//! - Request IDs, CORS, body limits and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
