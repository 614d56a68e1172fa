//! Application state.

use std::sync::Arc;

use rescale_queue::JobService;
use rescale_storage::ObjectStore;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub jobs: JobService,
    pub storage: Arc<dyn ObjectStore>,
}

impl AppState {
    pub fn new(config: ApiConfig, jobs: JobService, storage: Arc<dyn ObjectStore>) -> Self {
        Self {
            config,
            jobs,
            storage,
        }
    }
}
