//! Exit codes following sysexits.h conventions.
//!
//! These codes provide semantic meaning for different failure modes,
//! enabling sorter scripts to tell bad input from broken data or a dead link.

use cardsort_core::CardsortError;

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Command line usage error (invalid arguments).
/// Maps to EX_USAGE from sysexits.h.
pub const USAGE_ERROR: i32 = 64;

/// Data format error (malformed catalog or hash store).
/// Maps to EX_DATAERR from sysexits.h.
pub const DATA_ERROR: i32 = 65;

/// Cannot open input (frame, catalog snapshot, hash store).
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// Service unavailable (catalog index, image CDN, sorter link).
/// Maps to EX_UNAVAILABLE from sysexits.h.
pub const NETWORK_ERROR: i32 = 69;

/// I/O error (cannot write the store or collection).
/// Maps to EX_IOERR from sysexits.h.
pub const IO_ERROR: i32 = 74;

/// Represents an exit code with optional error context.
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        // The innermost core error decides; context strings are the fallback.
        let code = err
            .chain()
            .filter_map(|cause| cause.downcast_ref::<CardsortError>())
            .last()
            .map(classify)
            .unwrap_or_else(|| {
                if message.contains("Failed to read") {
                    INPUT_ERROR
                } else {
                    GENERAL_ERROR
                }
            });

        Self::error(code, message)
    }
}

fn classify(err: &CardsortError) -> i32 {
    match err {
        CardsortError::CatalogNotFound { .. } => INPUT_ERROR,
        CardsortError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => INPUT_ERROR,
        CardsortError::Io(_) => IO_ERROR,
        CardsortError::CatalogError(_)
        | CardsortError::StoreError(_)
        | CardsortError::InvalidFingerprint(_)
        | CardsortError::Json(_) => DATA_ERROR,
        CardsortError::ImageError(_) => INPUT_ERROR,
        CardsortError::DownloadError(_) | CardsortError::ActuatorError(_) => NETWORK_ERROR,
        CardsortError::HttpError(_) => NETWORK_ERROR,
        CardsortError::ConfigError(_) => USAGE_ERROR,
        CardsortError::WorkerError(_) => GENERAL_ERROR,
    }
}
