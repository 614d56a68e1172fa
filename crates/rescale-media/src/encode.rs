//! Resolution encodes.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::debug;

use rescale_models::{Dimensions, EncodingConfig};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::progress::ProgressCallback;

/// One scale-and-encode of a source into a local file.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    /// Source locator (local path or http(s) URL)
    pub input: String,
    /// Local output file
    pub output: PathBuf,
    /// Exact output frame size
    pub target: Dimensions,
    pub encoding: EncodingConfig,
    /// Kill the encoder after this many seconds
    pub timeout_secs: Option<u64>,
    /// Set to `true` to terminate the encoder
    pub cancel: Option<watch::Receiver<bool>>,
}

impl EncodeRequest {
    pub fn new(input: impl Into<String>, output: impl Into<PathBuf>, target: Dimensions) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            target,
            encoding: EncodingConfig::default(),
            timeout_secs: None,
            cancel: None,
        }
    }

    pub fn with_timeout(mut self, secs: Option<u64>) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Encodes a source at a target size, streaming progress.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Run the encode to completion.
    ///
    /// `Ok` means the encoder exited successfully and the output file exists.
    async fn encode(&self, request: EncodeRequest, on_progress: ProgressCallback) -> MediaResult<()>;
}

/// [`Encoder`] backed by the `ffmpeg` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegEncoder;

impl FfmpegEncoder {
    pub fn command(request: &EncodeRequest) -> FfmpegCommand {
        FfmpegCommand::new(&request.input, &request.output)
            .scale(request.target)
            .encoding(&request.encoding)
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(&self, request: EncodeRequest, on_progress: ProgressCallback) -> MediaResult<()> {
        let cmd = Self::command(&request);

        let mut runner = FfmpegRunner::new();
        if let Some(cancel) = request.cancel.clone() {
            runner = runner.with_cancel(cancel);
        }
        if let Some(secs) = request.timeout_secs {
            runner = runner.with_timeout(secs);
        }

        debug!(target_size = %request.target, output = %request.output.display(), "Starting encode");
        runner.run_with_progress(&cmd, on_progress).await?;

        if !tokio::fs::try_exists(&request.output).await.unwrap_or(false) {
            return Err(MediaError::OutputMissing(request.output.clone()));
        }
        Ok(())
    }
}
