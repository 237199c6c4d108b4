use std::io;
use std::path::PathBuf;

use tilevault_checkpoint::CheckpointError;
use tilevault_tile::TileError;

/// Errors that abort a compaction pass.
#[derive(Debug, thiserror::Error)]
pub enum CompactError {
    /// The log size could not be established.
    #[error("checkpoint: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A deletion candidate failed a safety check.
    #[error("refusing to delete {path}: {reason}")]
    Safety { path: String, reason: String },

    /// A name inside the tile tree does not parse as a tile.
    #[error("invalid tile path {path}: {source}")]
    Tile {
        path: String,
        #[source]
        source: TileError,
    },

    #[error("compaction cancelled")]
    Cancelled,
}

impl CompactError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn safety(path: &str, reason: impl Into<String>) -> Self {
        Self::Safety {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias for compaction.
pub type CompactResult<T> = Result<T, CompactError>;
