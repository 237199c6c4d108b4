use std::io;
use std::path::{Path, PathBuf};

/// Errors from loading and verifying checkpoints.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// The log descriptor is missing a field or carries an unusable key.
    #[error("configuration error: {0}")]
    Config(String),

    /// No trusted signature verified.
    #[error("verification failed: {0}")]
    Verification(String),

    /// The checkpoint is validly signed but names a different log.
    #[error("checkpoint origin {origin:?} does not match log name {name:?}")]
    OriginMismatch { origin: String, name: String },

    /// A note or checkpoint could not be parsed.
    #[error("malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CheckpointError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn malformed(what: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            what,
            reason: reason.into(),
        }
    }
}

/// Result alias for checkpoint operations.
pub type CheckpointResult<T> = Result<T, CheckpointError>;
