use std::io;
use std::path::PathBuf;

/// Boxed cause of a backend failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors from storage backend operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The key cannot be mapped into the backend's namespace.
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// No object is stored under the key.
    #[error("object not found: {key}")]
    NotFound { key: String },

    /// An immutable object already exists with different content.
    #[error("immutable object {key:?} already exists and does not match")]
    ContentMismatch { key: String },

    /// I/O error from the local filesystem.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Object storage failure, surfaced after retries were exhausted or a
    /// non-retryable error was seen.
    #[error("failed to {op} {key:?} after {attempts} attempt(s): {source}")]
    Backend {
        op: &'static str,
        key: String,
        attempts: u32,
        #[source]
        source: BoxError,
    },

    /// Backend construction failed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Metric registration or construction failed.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
