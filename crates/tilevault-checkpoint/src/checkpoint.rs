use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::{CheckpointError, CheckpointResult};

/// The body of a signed checkpoint note.
///
/// Text form:
///
/// ```text
/// <origin>
/// <tree size, decimal>
/// <root hash, base64>
/// [extension lines...]
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub origin: String,
    pub size: u64,
    pub root_hash: [u8; 32],
    pub extensions: Vec<String>,
}

impl Checkpoint {
    /// Parse checkpoint text. Every line, including the last, ends in `\n`.
    pub fn parse(text: &str) -> CheckpointResult<Self> {
        let body = text
            .strip_suffix('\n')
            .ok_or_else(|| CheckpointError::malformed("checkpoint", "missing final newline"))?;
        let mut lines = body.split('\n');

        let origin = match lines.next() {
            Some(origin) if !origin.is_empty() => origin.to_string(),
            _ => return Err(CheckpointError::malformed("checkpoint", "empty origin")),
        };
        let size = lines
            .next()
            .ok_or_else(|| CheckpointError::malformed("checkpoint", "missing tree size"))
            .and_then(parse_size)?;
        let root_hash = lines
            .next()
            .ok_or_else(|| CheckpointError::malformed("checkpoint", "missing root hash"))
            .and_then(parse_root_hash)?;

        let extensions: Vec<String> = lines.map(str::to_string).collect();
        if extensions.iter().any(String::is_empty) {
            return Err(CheckpointError::malformed(
                "checkpoint",
                "empty extension line",
            ));
        }

        Ok(Self {
            origin,
            size,
            root_hash,
            extensions,
        })
    }
}

fn parse_size(line: &str) -> CheckpointResult<u64> {
    let canonical = !line.is_empty()
        && line.bytes().all(|b| b.is_ascii_digit())
        && (line == "0" || !line.starts_with('0'));
    if !canonical {
        return Err(CheckpointError::malformed(
            "checkpoint",
            format!("non-canonical tree size {line:?}"),
        ));
    }
    line.parse().map_err(|_| {
        CheckpointError::malformed("checkpoint", format!("tree size {line} overflows"))
    })
}

fn parse_root_hash(line: &str) -> CheckpointResult<[u8; 32]> {
    let bytes = STANDARD
        .decode(line)
        .map_err(|e| CheckpointError::malformed("checkpoint", format!("root hash: {e}")))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        CheckpointError::malformed(
            "checkpoint",
            format!("root hash is {} bytes, want 32", bytes.len()),
        )
    })
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.origin)?;
        writeln!(f, "{}", self.size)?;
        writeln!(f, "{}", STANDARD.encode(self.root_hash))?;
        for ext in &self.extensions {
            writeln!(f, "{ext}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkpoint")
            .field("origin", &self.origin)
            .field("size", &self.size)
            .field("root_hash", &hex::encode(self.root_hash))
            .field("extensions", &self.extensions)
            .finish()
    }
}
