use thiserror::Error;

/// Errors produced while building or parsing tile identities.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TileError {
    #[error("malformed tile path {path:?}: {reason}")]
    MalformedPath { path: String, reason: String },

    #[error("tile index in {0:?} overflows u64")]
    IndexOverflow(String),

    #[error("invalid tile width {width}: must be in 1..={max}")]
    InvalidWidth { width: u32, max: u32 },
}

/// Result alias for tile operations.
pub type TileResult<T> = Result<T, TileError>;
