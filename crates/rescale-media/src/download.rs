//! Source download over HTTP(S).
//!
//! Remote sources are streamed to a local file before encoding so that every
//! resolution reads the same bytes and the network is hit once per job.

use futures_util::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use url::Url;

use crate::error::{MediaError, MediaResult};

/// True for `http://` and `https://` locators.
pub fn is_remote(locator: &str) -> bool {
    Url::parse(locator)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Streaming HTTP downloader.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpDownloader {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Downloader that gives up on slow connects and on stalled reads.
    pub fn with_timeouts(connect: Duration, read: Duration) -> MediaResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect)
            .read_timeout(read)
            .build()
            .map_err(|e| MediaError::download_failed(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Stream `url` into `dest`, returning the number of bytes written.
    ///
    /// A partially written file is removed on failure.
    pub async fn download(&self, url: &str, dest: &Path) -> MediaResult<u64> {
        info!(url = %url, dest = %dest.display(), "Downloading source");

        match self.stream_to_file(url, dest).await {
            Ok(bytes) => {
                info!(bytes, dest = %dest.display(), "Source downloaded");
                Ok(bytes)
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(dest).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to remove partial download {}: {}", dest.display(), rm);
                    }
                }
                Err(e)
            }
        }
    }

    async fn stream_to_file(&self, url: &str, dest: &Path) -> MediaResult<u64> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::download_failed(format!(
                "GET {} returned {}",
                url, status
            )));
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let data = chunk?;
            file.write_all(&data).await?;
            written += data.len() as u64;
        }
        file.flush().await?;

        if written == 0 {
            return Err(MediaError::download_failed(format!("{} returned an empty body", url)));
        }
        Ok(written)
    }
}
