use std::fmt;

/// What a compaction run removed.
///
/// Owned by the caller and passed into each run, so totals accumulate across
/// logs and survive a run that fails halfway.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub removed_files: u64,
    pub removed_dirs: u64,
    /// Sum of the sizes of removed files.
    pub removed_bytes: u64,
}

impl CompactionReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for CompactionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "files={} dirs={} bytes={}",
            self.removed_files, self.removed_dirs, self.removed_bytes
        )
    }
}
