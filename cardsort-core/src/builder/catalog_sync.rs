//! Catalog snapshot refresh from the vendor's bulk-data index.

use std::path::{Path, PathBuf};
use std::time::Duration;

use backoff::{future::retry_notify, ExponentialBackoff};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};

use super::download::{is_transient_error, is_transient_status};
use crate::catalog::{newest_snapshot, snapshot_files};
use crate::config::Settings;
use crate::error::{CardsortError, Result};

pub const BULK_DATA_URL: &str = "https://api.scryfall.com/bulk-data";
pub const DEFAULT_BULK_TYPE: &str = "default_cards";

/// Remote snapshots less than this much newer than the local one are skipped.
pub const MIN_SNAPSHOT_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Deserialize)]
struct BulkIndex {
    data: Vec<BulkEntry>,
}

/// One downloadable snapshot listed in the bulk-data index.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub updated_at: DateTime<Utc>,
    pub download_uri: String,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncDecision {
    Download,
    /// The remote snapshot is not enough newer than the local one.
    Skip { newer_by: chrono::Duration },
}

/// Whether to fetch a remote snapshot given the newest local one.
pub fn decide(
    remote_updated: DateTime<Utc>,
    local_modified: Option<DateTime<Utc>>,
    min_age: Duration,
    force: bool,
) -> SyncDecision {
    let Some(local) = local_modified else {
        return SyncDecision::Download;
    };
    let newer_by = remote_updated - local;
    let min_age = chrono::Duration::from_std(min_age).unwrap_or_else(|_| chrono::Duration::days(36_500));
    if force || newer_by >= min_age {
        SyncDecision::Download
    } else {
        SyncDecision::Skip { newer_by }
    }
}

/// `<prefix>-YYYYMMDD.json`
pub fn snapshot_file_name(prefix: &str, updated: DateTime<Utc>) -> String {
    format!("{prefix}-{}.json", updated.format("%Y%m%d"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Skipped {
        remote_updated: DateTime<Utc>,
        newer_by_days: i64,
    },
    Downloaded {
        path: PathBuf,
        bytes: u64,
        removed: usize,
    },
}

#[derive(Debug, Clone)]
pub struct CatalogSync {
    client: Client,
    dir: PathBuf,
    prefix: String,
    index_url: String,
    bulk_type: String,
    min_age: Duration,
}

impl CatalogSync {
    pub fn new(client: Client, dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            dir: dir.into(),
            prefix: prefix.into(),
            index_url: BULK_DATA_URL.to_string(),
            bulk_type: DEFAULT_BULK_TYPE.to_string(),
            min_age: MIN_SNAPSHOT_AGE,
        }
    }

    /// Sync into the data directory in `settings`. Snapshots are large, so
    /// only the connect phase is bounded by the request timeout.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(settings.builder.request_timeout)
            .user_agent(settings.builder.user_agent.clone())
            .build()
            .map_err(|e| CardsortError::CatalogError(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self::new(
            client,
            settings.data_dir.clone(),
            settings.catalog_prefix.clone(),
        ))
    }

    pub fn with_index_url(mut self, url: impl Into<String>) -> Self {
        self.index_url = url.into();
        self
    }

    pub fn with_min_age(mut self, min_age: Duration) -> Self {
        self.min_age = min_age;
        self
    }

    /// Look up the configured snapshot type in the bulk-data index.
    pub async fn fetch_entry(&self) -> Result<BulkEntry> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        let index = retry_notify(
            backoff,
            || self.fetch_index_once(),
            |err: CardsortError, wait: Duration| {
                warn!(error = %err, retry_after_ms = wait.as_millis() as u64, "Retry scheduled");
            },
        )
        .await?;

        index
            .data
            .into_iter()
            .find(|entry| entry.kind == self.bulk_type)
            .ok_or_else(|| {
                CardsortError::CatalogError(format!(
                    "Bulk-data index has no '{}' entry",
                    self.bulk_type
                ))
            })
    }

    async fn fetch_index_once(&self) -> std::result::Result<BulkIndex, backoff::Error<CardsortError>> {
        let response = self.client.get(&self.index_url).send().await.map_err(|e| {
            if is_transient_error(&e) {
                backoff::Error::transient(CardsortError::from(e))
            } else {
                backoff::Error::permanent(CardsortError::from(e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let err = CardsortError::CatalogError(format!("Bulk-data index returned status {status}"));
            return Err(if is_transient_status(status) {
                backoff::Error::transient(err)
            } else {
                backoff::Error::permanent(err)
            });
        }

        response
            .json::<BulkIndex>()
            .await
            .map_err(|e| backoff::Error::permanent(CardsortError::from(e)))
    }

    /// Refresh the local snapshot if the remote one is new enough.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn sync(&self, force: bool) -> Result<SyncOutcome> {
        let entry = self.fetch_entry().await?;
        let local = self.local_modified();
        match decide(entry.updated_at, local, self.min_age, force) {
            SyncDecision::Skip { newer_by } => {
                info!(
                    remote_updated = %entry.updated_at,
                    newer_by_days = newer_by.num_days(),
                    "Local catalog is recent, skipping download"
                );
                Ok(SyncOutcome::Skipped {
                    remote_updated: entry.updated_at,
                    newer_by_days: newer_by.num_days(),
                })
            }
            SyncDecision::Download => self.download(&entry).await,
        }
    }

    fn local_modified(&self) -> Option<DateTime<Utc>> {
        let path = newest_snapshot(&self.dir, &self.prefix).ok()?;
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
        Some(DateTime::<Utc>::from(modified))
    }

    async fn download(&self, entry: &BulkEntry) -> Result<SyncOutcome> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let name = snapshot_file_name(&self.prefix, entry.updated_at);
        let path = self.dir.join(&name);
        let tmp = self.dir.join(format!(".{name}.part"));

        info!(
            remote_updated = %entry.updated_at,
            size = entry.size,
            file = %name,
            "Downloading catalog snapshot"
        );
        let bytes = match self.stream_to(&entry.download_uri, &tmp).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e);
            }
        };

        let removed = remove_snapshots_except(&self.dir, &self.prefix, &path)?;
        tokio::fs::rename(&tmp, &path).await?;
        info!(file = %path.display(), bytes, removed, "Catalog snapshot saved");
        Ok(SyncOutcome::Downloaded {
            path,
            bytes,
            removed,
        })
    }

    async fn stream_to(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CardsortError::CatalogError(format!(
                "Snapshot download returned status {status}"
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

/// Delete every `<prefix>*.json` snapshot other than `keep`.
pub fn remove_snapshots_except(dir: &Path, prefix: &str, keep: &Path) -> Result<usize> {
    let mut removed = 0usize;
    for file in snapshot_files(dir, prefix)? {
        if file == keep {
            continue;
        }
        match std::fs::remove_file(&file) {
            Ok(()) => {
                info!(file = %file.display(), "Removed old catalog snapshot");
                removed += 1;
            }
            Err(e) => warn!(file = %file.display(), error = %e, "Failed to remove old snapshot"),
        }
    }
    Ok(removed)
}
