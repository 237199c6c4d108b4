use std::fs;
use std::path::Path;

use tracing::debug;

use crate::checkpoint::Checkpoint;
use crate::descriptor::LogDescriptor;
use crate::error::{CheckpointError, CheckpointResult};
use crate::note;

/// Log descriptor file name inside a log directory.
pub const LOG_DESCRIPTOR_FILE: &str = "log.v3.json";

/// Signed checkpoint file name inside a log directory.
pub const CHECKPOINT_FILE: &str = "checkpoint";

/// Read and verify the checkpoint of the log rooted at `root`.
///
/// The checkpoint must carry a valid signature from the descriptor's key and
/// its origin must equal the descriptor's name.
pub fn verified_checkpoint(root: &Path) -> CheckpointResult<Checkpoint> {
    let descriptor = LogDescriptor::load(root)?;
    let verifier = descriptor.verifier()?;

    let path = root.join(CHECKPOINT_FILE);
    let signed = fs::read(&path).map_err(|e| CheckpointError::io(&path, e))?;
    let note = note::open(&signed, &[&verifier])?;
    let checkpoint = Checkpoint::parse(&note.text)?;

    if checkpoint.origin != descriptor.name {
        return Err(CheckpointError::OriginMismatch {
            origin: checkpoint.origin,
            name: descriptor.name,
        });
    }
    debug!(
        origin = %checkpoint.origin,
        size = checkpoint.size,
        "verified checkpoint"
    );
    Ok(checkpoint)
}

/// Tree size committed to by the log's verified checkpoint.
pub fn verified_log_size(root: &Path) -> CheckpointResult<u64> {
    verified_checkpoint(root).map(|checkpoint| checkpoint.size)
}
