//! Offline fingerprint database maintenance.
//!
//! ## Stages
//!
//! 1. **Download**: catalog cards with neither a stored image nor a stored
//!    fingerprint are fetched by a pool of download workers.
//! 2. **Hash**: stored images without a fingerprint are hashed by a pool of
//!    hash workers (CPU work runs on the blocking pool).
//! 3. **Persist**: once every hash worker has exited, new fingerprints are
//!    merged into the store by the orchestrator alone.
//!
//! Presence checks gate all work, so a run over a complete store plans zero
//! tasks and makes no requests.

pub mod download;
pub mod hashing;
pub mod layout;
pub mod pool;

#[cfg(feature = "network")]
pub mod catalog_sync;

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use crate::catalog::Catalog;
use crate::config::{BuilderConfig, Settings};
use crate::error::{CardsortError, Result};
use crate::fingerprint::{Fingerprint, FingerprintStore, PerceptualHasher};

pub use download::{DownloadOutcome, Downloader, ImageFetcher};
pub use layout::ImageStore;
pub use pool::{Job, PoolReport, WorkerPool};

#[cfg(feature = "network")]
pub use catalog_sync::{CatalogSync, SyncOutcome};
#[cfg(feature = "network")]
pub use download::HttpFetcher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub card_id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashTask {
    pub card_id: String,
}

/// Counters for one builder run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub downloads_planned: usize,
    pub downloads_succeeded: usize,
    pub downloads_failed: usize,
    pub hashes_planned: usize,
    pub hashes_succeeded: usize,
    pub hashes_failed: usize,
    pub fingerprints_added: usize,
    pub store_total: usize,
    pub images_organized: usize,
}

impl BuildReport {
    /// No task was planned in either stage.
    pub fn is_noop(&self) -> bool {
        self.downloads_planned == 0 && self.hashes_planned == 0
    }
}

/// Cards to download: paper cards with an image URL whose id has neither a
/// stored image nor a stored fingerprint. Catalog order.
pub fn plan_downloads(
    catalog: &Catalog,
    stored_images: &HashSet<String>,
    known_fingerprints: &HashSet<String>,
) -> Vec<DownloadTask> {
    catalog
        .iter()
        .filter(|card| !card.digital)
        .filter(|card| !stored_images.contains(&card.id) && !known_fingerprints.contains(&card.id))
        .filter_map(|card| {
            card.image_url.as_ref().map(|url| DownloadTask {
                card_id: card.id.clone(),
                url: url.clone(),
            })
        })
        .collect()
}

/// Stored images lacking a fingerprint, sorted by id.
pub fn plan_hashes(
    stored_images: &HashSet<String>,
    known_fingerprints: &HashSet<String>,
) -> Vec<HashTask> {
    let mut ids: Vec<&String> = stored_images
        .iter()
        .filter(|id| !known_fingerprints.contains(*id))
        .collect();
    ids.sort();
    ids.into_iter()
        .map(|id| HashTask {
            card_id: id.clone(),
        })
        .collect()
}

pub struct DatabaseBuilder {
    config: BuilderConfig,
    images: ImageStore,
    store: FingerprintStore,
    fetcher: Arc<dyn ImageFetcher>,
}

impl std::fmt::Debug for DatabaseBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseBuilder")
            .field("config", &self.config)
            .field("images", &self.images)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl DatabaseBuilder {
    pub fn new(
        config: BuilderConfig,
        images: ImageStore,
        store: FingerprintStore,
        fetcher: Arc<dyn ImageFetcher>,
    ) -> Self {
        Self {
            config,
            images,
            store,
            fetcher,
        }
    }

    /// Builder over the data directory in `settings`, fetching over HTTP.
    #[cfg(feature = "network")]
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let fetcher = HttpFetcher::new(&settings.builder)?;
        Ok(Self::with_fetcher(settings, Arc::new(fetcher)))
    }

    pub fn with_fetcher(settings: &Settings, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self::new(
            settings.builder.clone(),
            ImageStore::new(settings.images_path()),
            FingerprintStore::new(settings.hashes_path()),
            fetcher,
        )
    }

    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    pub fn store(&self) -> &FingerprintStore {
        &self.store
    }

    /// Run every stage. Per-card failures are counted, not returned.
    #[instrument(skip_all, fields(cards = catalog.len()))]
    pub async fn run(&self, catalog: &Catalog) -> Result<BuildReport> {
        let mut report = BuildReport::default();

        self.store.ensure_exists()?;
        let known = self.store.known_ids()?;
        let stored = self.images.existing_ids()?;
        info!(
            fingerprints = known.len(),
            images = stored.len(),
            "Local store scanned"
        );

        let downloads = plan_downloads(catalog, &stored, &known);
        report.downloads_planned = downloads.len();
        info!(planned = downloads.len(), "Download stage");
        if !downloads.is_empty() {
            let outcomes = self.download_stage(downloads).await?;
            report.downloads_succeeded = outcomes.values().filter(|o| o.is_success()).count();
            report.downloads_failed = outcomes.len() - report.downloads_succeeded;
            report.images_organized = self.images.organize()?;
        }

        let stored = self.images.existing_ids()?;
        let hashes = plan_hashes(&stored, &known);
        report.hashes_planned = hashes.len();
        info!(planned = hashes.len(), "Hash stage");
        if !hashes.is_empty() {
            let results = self.hash_stage(hashes).await?;
            let fresh: Vec<(String, Fingerprint)> = results
                .into_iter()
                .filter_map(|(id, fp)| fp.map(|fp| (id, fp)))
                .collect();
            report.hashes_succeeded = fresh.len();
            report.hashes_failed = report.hashes_planned - fresh.len();

            if !fresh.is_empty() {
                let merged = self.store.merge(fresh)?;
                report.fingerprints_added = merged.added + merged.replaced;
                report.store_total = merged.total;
            }
        }
        if report.store_total == 0 {
            report.store_total = self.store.read_raw()?.len();
        }

        info!(
            downloads_succeeded = report.downloads_succeeded,
            downloads_failed = report.downloads_failed,
            hashes_succeeded = report.hashes_succeeded,
            hashes_failed = report.hashes_failed,
            fingerprints_added = report.fingerprints_added,
            store_total = report.store_total,
            "Database build finished"
        );
        Ok(report)
    }

    async fn download_stage(
        &self,
        tasks: Vec<DownloadTask>,
    ) -> Result<std::collections::HashMap<String, DownloadOutcome>> {
        let downloader = Downloader::new(
            Arc::clone(&self.fetcher),
            self.images.clone(),
            self.config.clone(),
        );
        let mut pool = WorkerPool::spawn(
            "download",
            self.config.download_workers,
            move |task: DownloadTask| {
                let downloader = downloader.clone();
                async move {
                    let outcome = downloader.download(&task.card_id, &task.url).await;
                    (task.card_id, outcome)
                }
            },
        )?;
        for task in tasks {
            pool.submit(task)?;
        }
        let report = pool.finish().await?;
        ensure_drained("download", &report)?;
        Ok(report.results)
    }

    async fn hash_stage(
        &self,
        tasks: Vec<HashTask>,
    ) -> Result<std::collections::HashMap<String, Option<Fingerprint>>> {
        let hasher = Arc::new(PerceptualHasher::new());
        let images = self.images.clone();
        let min_bytes = self.config.min_image_bytes;
        let mut pool = WorkerPool::spawn(
            "hash",
            self.config.hash_workers,
            move |task: HashTask| {
                let hasher = Arc::clone(&hasher);
                let path = images.path_for(&task.card_id);
                async move {
                    let fingerprint = hashing::hash_stored_image(hasher, path, min_bytes).await;
                    (task.card_id, fingerprint)
                }
            },
        )?;
        for task in tasks {
            pool.submit(task)?;
        }
        let report = pool.finish().await?;
        ensure_drained("hash", &report)?;
        Ok(report.results)
    }
}

/// The next stage may only start once every worker of this one has exited.
fn ensure_drained<R>(stage: &str, report: &PoolReport<R>) -> Result<()> {
    if report.all_workers_exited() {
        Ok(())
    } else {
        Err(CardsortError::WorkerError(format!(
            "{stage} stage: {} of {} workers exited",
            report.workers_exited, report.workers_spawned
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CardRecord;

    fn ids(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn card(id: &str, url: Option<&str>, digital: bool) -> CardRecord {
        let mut card = CardRecord::new(id, id, "m10");
        card.image_url = url.map(str::to_string);
        card.digital = digital;
        card
    }

    #[test]
    fn test_plan_downloads_gates() {
        let catalog = Catalog::from_records(vec![
            card("a1", Some("u/a1"), false),
            card("b2", Some("u/b2"), false),
            card("c3", Some("u/c3"), false),
            card("d4", Some("u/d4"), true),
            card("e5", None, false),
        ]);
        let plan = plan_downloads(&catalog, &ids(&["a1"]), &ids(&["b2"]));
        assert_eq!(
            plan,
            vec![DownloadTask {
                card_id: "c3".to_string(),
                url: "u/c3".to_string()
            }]
        );
    }

    #[test]
    fn test_plan_hashes_skips_known() {
        let plan = plan_hashes(&ids(&["c", "a", "b"]), &ids(&["b"]));
        let planned: Vec<_> = plan.into_iter().map(|t| t.card_id).collect();
        assert_eq!(planned, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_ensure_drained() {
        let ok: PoolReport<()> = PoolReport {
            results: Default::default(),
            submitted: 0,
            workers_spawned: 2,
            workers_exited: 2,
        };
        assert!(ensure_drained("x", &ok).is_ok());
        let short = PoolReport {
            workers_exited: 1,
            ..ok
        };
        assert!(ensure_drained("x", &short).is_err());
    }
}
