//! Fake collaborators and a harness for worker scenarios.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use rescale_media::{
    EncodeRequest, Encoder, FfmpegProgress, HttpDownloader, MediaError, MediaResult, ProgressCallback, Prober,
    VideoInfo,
};
use rescale_models::{Job, JobId, JobStatus, SubmitJob};
use rescale_queue::{JobRepository, JobService, JobStore, MemoryJobStore, MemoryWorkQueue, QueueResult, WorkQueue};
use rescale_storage::LocalStore;
use rescale_worker::{WorkerConfig, WorkerContext};

/// Prober reporting a fixed source and remembering what it was asked.
pub struct FixedProber {
    info: VideoInfo,
    pub locators: Mutex<Vec<String>>,
}

impl FixedProber {
    pub fn new(width: u32, height: u32, duration: f64) -> Self {
        Self {
            info: VideoInfo {
                duration,
                width,
                height,
                fps: 30.0,
                codec: "h264".to_string(),
            },
            locators: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Prober for FixedProber {
    async fn probe(&self, locator: &str) -> MediaResult<VideoInfo> {
        self.locators.lock().unwrap().push(locator.to_string());
        Ok(self.info.clone())
    }
}

/// Encoder that writes a small file instead of running ffmpeg.
#[derive(Default)]
pub struct FakeEncoder {
    fail: HashSet<String>,
    panic_on: HashSet<String>,
    steps: Vec<f64>,
    gate: Option<Arc<Semaphore>>,
    wait_for_cancel: bool,
    stall: HashSet<String>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, label: &str) -> Self {
        self.fail.insert(label.to_string());
        self
    }

    pub fn panicking(mut self, label: &str) -> Self {
        self.panic_on.insert(label.to_string());
        self
    }

    /// Elapsed seconds reported as progress, in order.
    pub fn with_steps(mut self, steps: &[f64]) -> Self {
        self.steps = steps.to_vec();
        self
    }

    /// Each encode takes one permit from `gate` before finishing.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Encodes only end when cancelled.
    pub fn hanging(mut self) -> Self {
        self.wait_for_cancel = true;
        self
    }

    /// Encodes of `label` never finish on their own; they honour the
    /// request's deadline the way the ffmpeg runner does.
    pub fn stalling(mut self, label: &str) -> Self {
        self.stall.insert(label.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn label_of(output: &Path) -> String {
    let stem = output.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    stem.rsplit_once('_').map(|(_, label)| label.to_string()).unwrap_or_default()
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn encode(&self, request: EncodeRequest, on_progress: ProgressCallback) -> MediaResult<()> {
        let label = label_of(&request.output);
        self.calls.lock().unwrap().push(label.clone());

        for secs in &self.steps {
            on_progress(FfmpegProgress {
                out_time_ms: (secs * 1000.0) as i64,
                ..Default::default()
            });
            tokio::task::yield_now().await;
        }

        if self.stall.contains(&label) {
            return match request.timeout_secs {
                Some(secs) => {
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    Err(MediaError::Timeout(secs))
                }
                None => std::future::pending().await,
            };
        }

        if self.wait_for_cancel {
            let mut cancel = request.cancel.clone().expect("cancel signal");
            while !*cancel.borrow_and_update() {
                if cancel.changed().await.is_err() {
                    break;
                }
            }
            return Err(MediaError::Cancelled);
        }

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate open").forget();
        }
        if self.panic_on.contains(&label) {
            panic!("encoder crashed on {}", label);
        }
        if self.fail.contains(&label) {
            return Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with error",
                Some("Conversion failed!".to_string()),
                Some(1),
            ));
        }

        tokio::fs::write(&request.output, b"encoded").await?;
        Ok(())
    }
}

/// Job store keeping a copy of every write.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryJobStore,
    pub writes: Mutex<Vec<Job>>,
}

impl RecordingStore {
    pub fn history(&self) -> Vec<Job> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobStore for RecordingStore {
    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>> {
        self.inner.get(id).await
    }

    async fn put(&self, job: &Job) -> QueueResult<()> {
        self.writes.lock().unwrap().push(job.clone());
        self.inner.put(job).await
    }

    async fn insert(&self, job: &Job) -> QueueResult<()> {
        self.inner.insert(job).await
    }

    async fn list(&self) -> QueueResult<Vec<JobId>> {
        self.inner.list().await
    }
}

/// Worker context over in-memory state, local storage and fakes.
pub struct Harness {
    pub ctx: Arc<WorkerContext>,
    pub service: JobService,
    pub repo: Arc<JobRepository>,
    pub queue: Arc<MemoryWorkQueue>,
    pub store: Arc<RecordingStore>,
    pub storage: Arc<LocalStore>,
    pub prober: Arc<FixedProber>,
    pub encoder: Arc<FakeEncoder>,
    pub work_dir: TempDir,
    pub storage_dir: TempDir,
}

impl Harness {
    pub fn new(prober: FixedProber, encoder: FakeEncoder) -> Self {
        Self::with_config(prober, encoder, |_| {})
    }

    pub fn with_config(
        prober: FixedProber,
        encoder: FakeEncoder,
        adjust: impl FnOnce(&mut WorkerConfig),
    ) -> Self {
        let work_dir = tempfile::tempdir().unwrap();
        let storage_dir = tempfile::tempdir().unwrap();

        let mut config = WorkerConfig {
            work_dir: work_dir.path().to_path_buf(),
            progress_interval: Duration::ZERO,
            poll_timeout: Duration::from_millis(50),
            reconcile_interval: Duration::from_millis(200),
            shutdown_timeout: Duration::from_secs(5),
            ..WorkerConfig::default()
        };
        adjust(&mut config);

        let store = Arc::new(RecordingStore::default());
        let queue = Arc::new(MemoryWorkQueue::new(config.max_concurrent_jobs as u64));
        let storage = Arc::new(LocalStore::new(storage_dir.path()));
        let prober = Arc::new(prober);
        let encoder = Arc::new(encoder);

        let downloader =
            HttpDownloader::with_timeouts(config.download_connect_timeout, config.download_read_timeout)
                .unwrap();

        let repo = Arc::new(JobRepository::new(store.clone()));
        let dyn_queue: Arc<dyn WorkQueue> = queue.clone();
        let service = JobService::new(repo.clone(), dyn_queue.clone());
        let ctx = Arc::new(WorkerContext::new(
            config,
            repo.clone(),
            dyn_queue,
            storage.clone(),
            prober.clone(),
            encoder.clone(),
        )
        .with_downloader(downloader));

        Self {
            ctx,
            service,
            repo,
            queue,
            store,
            storage,
            prober,
            encoder,
            work_dir,
            storage_dir,
        }
    }

    pub async fn submit(&self, id: &str, input: &str, resolutions: &[&str]) {
        self.submit_request(
            SubmitJob::new(input, resolutions.iter().map(|s| s.to_string()).collect())
                .with_job_id(id),
        )
        .await;
    }

    pub async fn submit_request(&self, request: SubmitJob) {
        self.service.submit(request).await.unwrap();
    }

    /// Dequeue, activate and admit the next job, as the scheduler does.
    pub async fn admit_next(&self) -> JobId {
        let id = self.queue.dequeue().await.unwrap().expect("queued job");
        assert!(self.queue.try_activate(&id).await.unwrap());
        self.repo
            .update(&id, |job| {
                job.admit()?;
                Ok(())
            })
            .await
            .unwrap();
        id
    }

    pub async fn job(&self, id: &str) -> Job {
        self.repo.get(&JobId::from(id)).await.unwrap()
    }

    /// Files left in the work directory.
    pub fn scratch_files(&self) -> Vec<String> {
        std::fs::read_dir(self.work_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect()
    }
}

const WAIT_LIMIT: Duration = Duration::from_secs(5);

impl Harness {
    /// Poll until the job reaches `status`, failing the test after a while.
    pub async fn wait_for_status(&self, id: &str, status: JobStatus) {
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        loop {
            let current = self.job(id).await.status;
            if current == status {
                return;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("job {} stuck in {} waiting for {}", id, current, status);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until the encoder has been called `count` times.
    pub async fn wait_for_encodes(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        while self.encoder.calls().len() < count {
            if tokio::time::Instant::now() > deadline {
                panic!("expected {} encodes, saw {:?}", count, self.encoder.calls());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
