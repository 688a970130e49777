use std::path::PathBuf;

use thiserror::Error;

/// Library error type for rotation operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested number of photos is not a positive integer.
    #[error("photo count must be positive (got {0})")]
    InvalidCount(usize),

    /// Library and gallery resolve to the same directory.
    #[error("gallery path cannot be the same as library path: {}", .0.display())]
    SamePaths(PathBuf),

    /// The library directory is missing.
    #[error("library path does not exist: {}", .0.display())]
    LibraryMissing(PathBuf),

    /// Another rotation is already running.
    #[error("operation already in progress")]
    Busy,

    /// The operation observed the cancellation flag and stopped.
    #[error("operation cancelled")]
    Cancelled,

    /// The worker thread could not be started or died unexpectedly.
    #[error("rotation worker failed: {0}")]
    Worker(String),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Persisted record could not be encoded or decoded.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
