//! Common utility functions shared across CLI commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cardsort_core::{BinLabel, CardsortError, Settings, SortingMode};
use colored::{ColoredString, Colorize};
use image::RgbImage;
use tracing_subscriber::{fmt, EnvFilter};

/// Log filter used when `RUST_LOG` is unset.
pub fn default_filter(verbose: bool, quiet: bool) -> &'static str {
    if verbose {
        "cardsort=debug,cardsort_core=debug,info"
    } else if quiet {
        "error"
    } else {
        "cardsort=info,cardsort_core=info,warn"
    }
}

/// Install the stderr log subscriber. `RUST_LOG` wins over the flags.
pub fn init_tracing(verbose: bool, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose, quiet)));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Settings from the environment, with `--data-dir` taking precedence.
pub fn load_settings(data_dir: Option<PathBuf>) -> Settings {
    let mut settings = Settings::from_env();
    if let Some(dir) = data_dir {
        settings.data_dir = dir;
    }
    settings
}

/// Decode a camera frame.
pub fn read_frame(path: &Path) -> Result<RgbImage> {
    let image =
        image::open(path).with_context(|| format!("Failed to read image: {}", path.display()))?;
    Ok(image.to_rgb8())
}

/// Price threshold for `mode`. The buy mode has no sensible default, so it
/// must be given explicitly; other modes ignore it.
pub fn price_threshold(mode: SortingMode, threshold: Option<f64>) -> Result<f64> {
    match (mode, threshold) {
        (SortingMode::Buy, None) => Err(CardsortError::ConfigError(
            "The buy mode needs --threshold".to_string(),
        )
        .into()),
        (_, threshold) => Ok(threshold.unwrap_or(0.0)),
    }
}

/// Bin label colored for the terminal: rejects in red.
pub fn paint_bin(label: &BinLabel) -> ColoredString {
    match label {
        BinLabel::Reject => label.as_str().red().bold(),
        BinLabel::Bin(bin) => bin.as_str().green().bold(),
    }
}
