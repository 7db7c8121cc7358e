//! Artifact downloader.
//!
//! Streams a release artifact to a staging file. Every chunk is written as
//! it arrives, and a failed or cancelled download never leaves a partial
//! file behind. Retrying is the caller's business.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DownloadConfig;
use crate::error::UpdateError;

/// Bytes between progress reports when the size is unknown.
const UNKNOWN_SIZE_REPORT_STEP: u64 = 1024 * 1024;

/// Configuration for the downloader.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Read timeout while streaming.
    pub read_timeout: Duration,
    /// Deadline for the whole transfer.
    pub timeout: Duration,
    /// User agent string.
    pub user_agent: String,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self::from(&DownloadConfig::default())
    }
}

impl From<&DownloadConfig> for DownloaderConfig {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            read_timeout: Duration::from_secs(config.read_timeout_secs),
            timeout: config.timeout(),
            user_agent: config.user_agent.clone(),
        }
    }
}

/// Progress callback type for download progress reporting.
pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// Download progress information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes downloaded so far.
    pub downloaded: u64,
    /// Total bytes, when the server announced it.
    pub total: Option<u64>,
}

impl DownloadProgress {
    /// Whole percent complete, if the total is known.
    pub fn percent(&self) -> Option<u8> {
        match self.total {
            Some(0) => Some(100),
            Some(total) => Some(((self.downloaded.min(total) * 100) / total) as u8),
            None => None,
        }
    }
}

/// Streaming HTTP downloader.
pub struct Downloader {
    client: reqwest::Client,
    config: DownloaderConfig,
}

impl Downloader {
    /// Create a downloader with the given settings.
    pub fn new(config: DownloaderConfig) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| UpdateError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    /// Download `url` to `dest`, returning the number of bytes written.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<u64, UpdateError> {
        self.download_with(url, dest, &CancellationToken::new(), None)
            .await
    }

    /// Download with cancellation and optional progress reporting.
    ///
    /// The transfer is bounded by [`DownloaderConfig::timeout`]; exceeding it
    /// yields [`UpdateError::Timeout`]. Cancelling `cancel` yields
    /// [`UpdateError::Cancelled`]. In both cases, as on any other error,
    /// `dest` is removed before returning.
    pub async fn download_with(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
        progress: Option<&ProgressCallback>,
    ) -> Result<u64, UpdateError> {
        info!("Starting download: {} -> {:?}", url, dest);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UpdateError::Cancelled),
            outcome = tokio::time::timeout(self.config.timeout, self.stream_to_file(url, dest, progress)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(UpdateError::Timeout(format!(
                        "download did not finish within {}s",
                        self.config.timeout.as_secs_f32()
                    ))),
                }
            }
        };

        match result {
            Ok(bytes) => {
                info!("Download complete: {} bytes", bytes);
                Ok(bytes)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(dest).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to remove partial download {:?}: {}", dest, cleanup);
                    }
                }
                Err(e)
            }
        }
    }

    async fn stream_to_file(
        &self,
        url: &str,
        dest: &Path,
        progress: Option<&ProgressCallback>,
    ) -> Result<u64, UpdateError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Http {
                status: status.as_u16(),
            });
        }

        let total = response.content_length();
        debug!("Response OK, content length {:?}", total);

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut reporter = ProgressReporter::new(progress, total);
        let mut downloaded = 0u64;

        reporter.report(0);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            reporter.report(downloaded);
        }

        file.flush().await?;
        file.sync_all().await?;

        if let Some(expected) = total {
            if downloaded < expected {
                return Err(UpdateError::Network(format!(
                    "connection closed after {} of {} bytes",
                    downloaded, expected
                )));
            }
        }

        reporter.finish(downloaded);
        Ok(downloaded)
    }
}

/// Forwards progress only when the whole percentage changes.
struct ProgressReporter<'a> {
    callback: Option<&'a ProgressCallback>,
    total: Option<u64>,
    last_percent: Option<u8>,
    last_bytes: u64,
}

impl<'a> ProgressReporter<'a> {
    fn new(callback: Option<&'a ProgressCallback>, total: Option<u64>) -> Self {
        Self {
            callback,
            total,
            last_percent: None,
            last_bytes: 0,
        }
    }

    fn report(&mut self, downloaded: u64) {
        let Some(callback) = self.callback else { return };
        let progress = DownloadProgress {
            downloaded,
            total: self.total,
        };

        let due = match progress.percent() {
            Some(percent) => self.last_percent != Some(percent),
            None => {
                downloaded == 0 || downloaded - self.last_bytes >= UNKNOWN_SIZE_REPORT_STEP
            }
        };

        if due {
            self.last_percent = progress.percent();
            self.last_bytes = downloaded;
            callback(progress);
        }
    }

    fn finish(&mut self, downloaded: u64) {
        if self.total.is_none() && downloaded != self.last_bytes {
            if let Some(callback) = self.callback {
                callback(DownloadProgress {
                    downloaded,
                    total: None,
                });
            }
        }
    }
}
