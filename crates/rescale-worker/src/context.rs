//! Collaborators shared by the scheduler, job runners and resolution workers.

use std::sync::Arc;

use tokio::sync::watch;

use rescale_media::{Encoder, HttpDownloader, Prober};
use rescale_queue::{JobRepository, WorkQueue};
use rescale_storage::ObjectStore;

use crate::config::WorkerConfig;

/// Everything a job needs, built once at start-up.
pub struct WorkerContext {
    pub config: WorkerConfig,
    pub repo: Arc<JobRepository>,
    pub queue: Arc<dyn WorkQueue>,
    pub storage: Arc<dyn ObjectStore>,
    pub prober: Arc<dyn Prober>,
    pub encoder: Arc<dyn Encoder>,
    pub downloader: HttpDownloader,
    cancel: watch::Sender<bool>,
}

impl WorkerContext {
    pub fn new(
        config: WorkerConfig,
        repo: Arc<JobRepository>,
        queue: Arc<dyn WorkQueue>,
        storage: Arc<dyn ObjectStore>,
        prober: Arc<dyn Prober>,
        encoder: Arc<dyn Encoder>,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            config,
            repo,
            queue,
            storage,
            prober,
            encoder,
            downloader: HttpDownloader::new(),
            cancel,
        }
    }

    pub fn with_downloader(mut self, downloader: HttpDownloader) -> Self {
        self.downloader = downloader;
        self
    }

    /// Receiver handed to each encode; flips to `true` on forced shutdown.
    pub fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }

    /// Ask every running encoder to terminate.
    pub fn cancel_encoders(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}
