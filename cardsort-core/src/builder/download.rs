//! Card image downloads with bounded retry.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::{future::retry_notify, ExponentialBackoff};
use tracing::{debug, warn};

use super::layout::ImageStore;
use crate::config::BuilderConfig;
use crate::error::{CardsortError, Result};

/// Remote image source.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Stream `url` into `dest`, returning the number of bytes written.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// What happened to one download task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded { bytes: u64, attempts: u32 },
    /// A valid image was already on disk; no request was made.
    AlreadyPresent,
    Failed { attempts: u32, reason: String },
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, DownloadOutcome::Failed { .. })
    }
}

/// Downloads one card image into the image store.
#[derive(Clone)]
pub struct Downloader {
    fetcher: Arc<dyn ImageFetcher>,
    store: ImageStore,
    config: BuilderConfig,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("store", &self.store)
            .field("max_attempts", &self.config.max_attempts)
            .finish_non_exhaustive()
    }
}

impl Downloader {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, store: ImageStore, config: BuilderConfig) -> Self {
        Self {
            fetcher,
            store,
            config,
        }
    }

    /// Fetch a card image, retrying failed, timed-out or undersized attempts.
    ///
    /// Never returns an error: exhausting the attempts yields
    /// [`DownloadOutcome::Failed`] and any partial file is removed.
    pub async fn download(&self, card_id: &str, url: &str) -> DownloadOutcome {
        let min_bytes = self.config.min_image_bytes;
        if self.store.stored_size(card_id).is_some_and(|size| size > min_bytes) {
            return DownloadOutcome::AlreadyPresent;
        }

        let dest = self.store.path_for(card_id);
        if let Err(e) = tokio::fs::create_dir_all(self.store.shard_dir(card_id)).await {
            return DownloadOutcome::Failed {
                attempts: 0,
                reason: format!("Cannot create image directory: {e}"),
            };
        }

        let attempts = AtomicU32::new(0);
        let max_attempts = self.config.max_attempts.max(1);
        let timeout = self.config.request_timeout;

        let result = retry_notify(
            self.build_backoff(),
            || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                let dest = dest.as_path();
                async move {
                    self.attempt(url, dest, timeout, min_bytes).await.map_err(|err| {
                        if attempt >= max_attempts {
                            backoff::Error::permanent(err)
                        } else {
                            backoff::Error::transient(err)
                        }
                    })
                }
            },
            |err: CardsortError, wait: Duration| {
                warn!(
                    card_id,
                    error = %err,
                    retry_after_ms = wait.as_millis() as u64,
                    "Image download failed, retrying"
                );
            },
        )
        .await;

        let attempts = attempts.load(Ordering::SeqCst);
        match result {
            Ok(bytes) => {
                debug!(card_id, bytes, attempts, "Image downloaded");
                DownloadOutcome::Downloaded { bytes, attempts }
            }
            Err(err) => {
                warn!(card_id, attempts, error = %err, "Image download gave up");
                DownloadOutcome::Failed {
                    attempts,
                    reason: err.to_string(),
                }
            }
        }
    }

    async fn attempt(&self, url: &str, dest: &Path, timeout: Duration, min_bytes: u64) -> Result<u64> {
        let outcome = tokio::time::timeout(timeout, self.fetcher.fetch(url, dest)).await;
        let err = match outcome {
            Ok(Ok(bytes)) if bytes > min_bytes => return Ok(bytes),
            Ok(Ok(bytes)) => CardsortError::DownloadError(format!(
                "Image too small ({bytes} bytes, need more than {min_bytes})"
            )),
            Ok(Err(e)) => e,
            Err(_) => CardsortError::DownloadError(format!("Timed out after {timeout:?}")),
        };
        remove_partial(dest).await;
        Err(err)
    }

    fn build_backoff(&self) -> ExponentialBackoff {
        let interval = self.config.retry_interval;
        ExponentialBackoff {
            current_interval: interval,
            initial_interval: interval,
            randomization_factor: 0.0,
            multiplier: 1.0,
            max_interval: interval,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

async fn remove_partial(dest: &Path) {
    match tokio::fs::remove_file(dest).await {
        Ok(()) => debug!(file = %dest.display(), "Removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(file = %dest.display(), error = %e, "Failed to remove partial download"),
    }
}

#[cfg(feature = "network")]
pub use http::{is_transient_error, is_transient_status, HttpFetcher};

#[cfg(feature = "network")]
mod http {
    use std::path::Path;

    use async_trait::async_trait;
    use reqwest::{Client, StatusCode};
    use tokio::io::AsyncWriteExt;

    use super::ImageFetcher;
    use crate::config::BuilderConfig;
    use crate::error::{CardsortError, Result};

    /// Streams images over HTTPS with reqwest.
    #[derive(Debug, Clone)]
    pub struct HttpFetcher {
        client: Client,
    }

    impl HttpFetcher {
        pub fn new(config: &BuilderConfig) -> Result<Self> {
            let client = Client::builder()
                .timeout(config.request_timeout)
                .user_agent(config.user_agent.clone())
                .build()
                .map_err(|e| {
                    CardsortError::DownloadError(format!("Failed to create HTTP client: {e}"))
                })?;
            Ok(Self { client })
        }

        pub fn client(&self) -> &Client {
            &self.client
        }
    }

    #[async_trait]
    impl ImageFetcher for HttpFetcher {
        async fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
            let mut response = self.client.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(CardsortError::DownloadError(format!(
                    "{url} returned status {status}"
                )));
            }

            let mut file = tokio::fs::File::create(dest).await?;
            let mut written = 0u64;
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok(written)
        }
    }

    /// Check if a reqwest error is transient and worth retrying.
    pub fn is_transient_error(error: &reqwest::Error) -> bool {
        error.is_timeout() || error.is_connect() || error.is_request()
    }

    /// Check if an HTTP status code indicates a transient error.
    pub fn is_transient_status(status: StatusCode) -> bool {
        matches!(
            status,
            StatusCode::TOO_MANY_REQUESTS
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
                | StatusCode::BAD_GATEWAY
        )
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replies with a scripted byte count per call, writing that many bytes.
    struct ScriptedFetcher {
        sizes: Mutex<Vec<usize>>,
        calls: AtomicU32,
    }

    impl ScriptedFetcher {
        fn new(sizes: &[usize]) -> Arc<Self> {
            Arc::new(Self {
                sizes: Mutex::new(sizes.iter().rev().copied().collect()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ImageFetcher for ScriptedFetcher {
        async fn fetch(&self, _url: &str, dest: &Path) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let size = self.sizes.lock().unwrap().pop().unwrap_or(0);
            if size == usize::MAX {
                return Err(CardsortError::DownloadError("connection reset".to_string()));
            }
            tokio::fs::write(dest, vec![7u8; size]).await?;
            Ok(size as u64)
        }
    }

    fn config() -> BuilderConfig {
        BuilderConfig {
            retry_interval: Duration::from_millis(1),
            ..BuilderConfig::default()
        }
    }

    #[tokio::test]
    async fn test_retries_until_valid_size() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::new(&[10, usize::MAX, 4096]);
        let downloader = Downloader::new(fetcher.clone(), ImageStore::new(dir.path()), config());

        let outcome = downloader.download("abc", "https://img/abc.png").await;
        assert_eq!(outcome, DownloadOutcome::Downloaded { bytes: 4096, attempts: 3 });
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
        assert_eq!(std::fs::metadata(dir.path().join("a/abc.png")).unwrap().len(), 4096);
    }

    #[tokio::test]
    async fn test_gives_up_and_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::new(&[100, 200, 300, 5000]);
        let downloader = Downloader::new(fetcher.clone(), ImageStore::new(dir.path()), config());

        let outcome = downloader.download("abc", "https://img/abc.png").await;
        assert!(matches!(outcome, DownloadOutcome::Failed { attempts: 3, .. }));
        assert!(!outcome.is_success());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
        assert!(!dir.path().join("a/abc.png").exists());
    }

    #[tokio::test]
    async fn test_existing_valid_image_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/abc.png"), vec![1u8; 2048]).unwrap();

        let fetcher = ScriptedFetcher::new(&[]);
        let downloader = Downloader::new(fetcher.clone(), ImageStore::new(dir.path()), config());
        assert_eq!(
            downloader.download("abc", "https://img/abc.png").await,
            DownloadOutcome::AlreadyPresent
        );
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }
}
