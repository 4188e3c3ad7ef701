use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CardsortError {
    #[error("No catalog snapshot matching '{pattern}' in {}", dir.display())]
    CatalogNotFound { dir: PathBuf, pattern: String },

    #[error("Catalog error: {0}")]
    CatalogError(String),

    #[error("Fingerprint store error: {0}")]
    StoreError(String),

    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Download failed: {0}")]
    DownloadError(String),

    #[error("Actuator error: {0}")]
    ActuatorError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Worker pool error: {0}")]
    WorkerError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "network")]
    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl From<image::ImageError> for CardsortError {
    fn from(err: image::ImageError) -> Self {
        CardsortError::ImageError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CardsortError>;
