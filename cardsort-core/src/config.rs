//! Runtime configuration.
//!
//! Every tunable of the recognition path and of the database builder lives
//! here. [`Settings::from_env`] layers `CARDSORT_*` environment variables over
//! the defaults; the CLI applies its own flags on top of that.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Sets never matched against: non-paper and legacy reprints.
pub const DEFAULT_EXCLUDED_SETS: &[&str] =
    &["30a", "lea", "leb", "fbb", "ced", "cei", "4bb", "ptc", "sum"];

/// Canonical rectified card width in pixels.
pub const CANONICAL_WIDTH: u32 = 745;

/// Canonical rectified card height in pixels.
pub const CANONICAL_HEIGHT: u32 = 1043;

/// Card-boundary search parameters.
#[derive(Debug, Clone)]
pub struct GeometryConfig {
    /// Gaussian blur sigma applied before edge detection.
    pub blur_sigma: f32,
    /// Canny hysteresis low threshold.
    pub canny_low: f32,
    /// Canny hysteresis high threshold.
    pub canny_high: f32,
    /// Polygon approximation tolerance as a fraction of the contour perimeter.
    pub approx_epsilon_ratio: f64,
    /// Quadrilaterals enclosing less area (px²) are ignored.
    pub min_area: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 0.8,
            canny_low: 50.0,
            canny_high: 150.0,
            approx_epsilon_ratio: 0.02,
            min_area: 10_000.0,
        }
    }
}

/// Output geometry of the perspective normalizer.
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    pub width: u32,
    pub height: u32,
    /// Side of the square taken from the top of the rectified card for hashing.
    pub crop_size: u32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            width: CANONICAL_WIDTH,
            height: CANONICAL_HEIGHT,
            crop_size: CANONICAL_WIDTH,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdentifierConfig {
    /// Lowercase set codes dropped from the ranking.
    pub excluded_sets: BTreeSet<String>,
    /// Matches farther than this average Hamming distance count as not found.
    pub max_distance: Option<f64>,
    /// Remap foreign-language matches to an English printing of the same art.
    pub prefer_english: bool,
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        Self {
            excluded_sets: DEFAULT_EXCLUDED_SETS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_distance: Some(100.0),
            prefer_english: false,
        }
    }
}

/// Sampling policy of the name consensus vote.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Readings needed before the vote is decided.
    pub min_observations: usize,
    pub max_attempts: usize,
    pub timeout: Duration,
    /// Sleep before each attempt.
    pub pacing: Duration,
    /// Top of the title band as a fraction of the card bounding-box height.
    pub title_band_top: f32,
    /// Bottom of the title band as a fraction of the card bounding-box height.
    pub title_band_bottom: f32,
}

impl ConsensusConfig {
    /// Decide on the first plausible reading.
    pub fn fast() -> Self {
        Self {
            min_observations: 1,
            ..Self::default()
        }
    }

    /// Require two agreeing-or-not readings out of five attempts.
    pub fn strict() -> Self {
        Self {
            min_observations: 2,
            ..Self::default()
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_observations: 2,
            max_attempts: 5,
            timeout: Duration::from_secs(10),
            pacing: Duration::from_millis(100),
            title_band_top: 0.05,
            title_band_bottom: 0.13,
        }
    }
}

/// When a voted name is close enough to the identified card's name.
#[derive(Debug, Clone)]
pub struct AcceptancePolicy {
    pub min_similarity: f64,
    /// Lower similarity bar that applies only when the mana cost read from the
    /// card matches the candidate's.
    pub mana_cost_similarity: Option<f64>,
}

impl Default for AcceptancePolicy {
    fn default() -> Self {
        Self {
            min_similarity: 0.6,
            mana_cost_similarity: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecognitionConfig {
    pub geometry: GeometryConfig,
    pub normalizer: NormalizerConfig,
    pub identifier: IdentifierConfig,
    pub consensus: ConsensusConfig,
    pub acceptance: AcceptancePolicy,
}

/// Database builder tuning.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub download_workers: usize,
    pub hash_workers: usize,
    /// Attempts per image download, first try included.
    pub max_attempts: u32,
    /// Pause between download attempts.
    pub retry_interval: Duration,
    /// Per-attempt HTTP timeout.
    pub request_timeout: Duration,
    /// Stored images at or below this size are treated as corrupt.
    pub min_image_bytes: u64,
    pub user_agent: String,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            download_workers: 20,
            hash_workers: 8,
            max_attempts: 3,
            retry_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            min_image_bytes: 1024,
            user_agent: concat!("cardsort/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Top-level settings: data locations plus component configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory holding catalog snapshots, the hash store and the image store.
    pub data_dir: PathBuf,
    /// Catalog snapshots are `<prefix>*.json` inside `data_dir`.
    pub catalog_prefix: String,
    /// Hash store file name, relative to `data_dir` unless absolute.
    pub hashes_file: PathBuf,
    /// Image store directory, relative to `data_dir` unless absolute.
    pub images_dir: PathBuf,
    pub recognition: RecognitionConfig,
    pub builder: BuilderConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            catalog_prefix: "default".to_string(),
            hashes_file: PathBuf::from("card_hashes.json"),
            images_dir: PathBuf::from("card_images_png"),
            recognition: RecognitionConfig::default(),
            builder: BuilderConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(dir) = std::env::var("CARDSORT_DATA_DIR") {
            settings.data_dir = PathBuf::from(dir);
        }
        if let Ok(prefix) = std::env::var("CARDSORT_CATALOG_PREFIX") {
            settings.catalog_prefix = prefix;
        }
        if let Ok(file) = std::env::var("CARDSORT_HASHES") {
            settings.hashes_file = PathBuf::from(file);
        }
        if let Ok(dir) = std::env::var("CARDSORT_IMAGES_DIR") {
            settings.images_dir = PathBuf::from(dir);
        }
        if let Ok(sets) = std::env::var("CARDSORT_EXCLUDED_SETS") {
            settings.recognition.identifier.excluded_sets = parse_set_list(&sets);
        }
        if let Some(similarity) = env_parse("CARDSORT_MIN_SIMILARITY") {
            settings.recognition.acceptance.min_similarity = similarity;
        }
        if let Some(workers) = env_parse("CARDSORT_DOWNLOAD_WORKERS") {
            settings.builder.download_workers = workers;
        }
        if let Some(workers) = env_parse("CARDSORT_HASH_WORKERS") {
            settings.builder.hash_workers = workers;
        }

        settings
    }

    /// Absolute-or-data-dir-relative path of the hash store.
    pub fn hashes_path(&self) -> PathBuf {
        self.data_dir.join(&self.hashes_file)
    }

    /// Absolute-or-data-dir-relative path of the image store.
    pub fn images_path(&self) -> PathBuf {
        self.data_dir.join(&self.images_dir)
    }
}

/// Parse a comma-separated list of set codes into a lowercase set.
pub fn parse_set_list(list: &str) -> BTreeSet<String> {
    list.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
