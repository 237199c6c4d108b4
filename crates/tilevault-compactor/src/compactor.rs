use std::collections::HashSet;
use std::fs::{self, File, FileType};
use std::io;
use std::path::{Path, PathBuf};

use tilevault_checkpoint::verified_log_size;
use tilevault_store::immutable;
use tilevault_tile::{tile_size, Tile, PARTIAL_SUFFIX, TRAVERSAL_MARKER};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CompactError, CompactResult};
use crate::report::CompactionReport;

const TILE_DIR: &str = "tile";

/// How the compactor treats a directory entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind<'a> {
    /// A fan-out directory (`x…`). Always descended into.
    Traversal,
    /// `<full_name>.p`, a group of partial versions of tile `<full_name>`.
    PartialGroup { full_name: &'a str },
    /// A full tile or anything else. Never touched.
    Other,
}

impl<'a> EntryKind<'a> {
    pub fn classify(name: &'a str) -> Self {
        if name.starts_with(TRAVERSAL_MARKER) {
            return Self::Traversal;
        }
        match name.strip_suffix(PARTIAL_SUFFIX) {
            Some(full_name) if !full_name.is_empty() => Self::PartialGroup { full_name },
            _ => Self::Other,
        }
    }
}

struct Entry {
    name: String,
    file_type: FileType,
}

/// One compaction pass over a local log directory.
pub struct PartialCompactor {
    root: PathBuf,
    size: u64,
}

impl PartialCompactor {
    /// `size` must come from a verified checkpoint.
    pub fn new(root: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            root: root.into(),
            size,
        }
    }

    /// Delete every partial tile that passes the safety checks.
    ///
    /// Stops at the first error. Whatever was removed before that is already
    /// counted in `report`.
    pub fn run(
        &self,
        cancel: &CancellationToken,
        report: &mut CompactionReport,
    ) -> CompactResult<()> {
        let levels = match self.list(TILE_DIR) {
            Ok(levels) => levels,
            Err(CompactError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                debug!("tile directory does not exist, skipping");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        for level in levels {
            self.clean_dir(&format!("{TILE_DIR}/{}", level.name), cancel, report)?;
        }
        Ok(())
    }

    fn clean_dir(
        &self,
        prefix: &str,
        cancel: &CancellationToken,
        report: &mut CompactionReport,
    ) -> CompactResult<()> {
        if cancel.is_cancelled() {
            return Err(CompactError::Cancelled);
        }
        let entries = self.list(prefix)?;
        let names: HashSet<&str> = entries.iter().map(|e| e.name.as_str()).collect();

        for entry in &entries {
            let name = format!("{prefix}/{}", entry.name);
            match EntryKind::classify(&entry.name) {
                EntryKind::Traversal => {
                    require_dir(&name, &entry.file_type)?;
                    self.clean_dir(&name, cancel, report)?;
                }
                EntryKind::PartialGroup { full_name } => {
                    if !names.contains(full_name) {
                        continue;
                    }
                    let full = format!("{prefix}/{full_name}");
                    if !self.left_of_edge(&full)? {
                        continue;
                    }
                    require_dir(&name, &entry.file_type)?;
                    self.remove_group(&name, &full, cancel, report)?;
                }
                EntryKind::Other => {}
            }
        }
        Ok(())
    }

    /// Whether the tile at `full` is complete below the tree size.
    fn left_of_edge(&self, full: &str) -> CompactResult<bool> {
        let tile = Tile::parse_path(full).map_err(|source| CompactError::Tile {
            path: full.to_string(),
            source,
        })?;
        Ok(match tile_size(tile.level) {
            Some(size) => tile.index < self.size / size,
            None => false,
        })
    }

    fn remove_group(
        &self,
        group: &str,
        full: &str,
        cancel: &CancellationToken,
        report: &mut CompactionReport,
    ) -> CompactResult<()> {
        for partial in self.list(group)? {
            let name = format!("{group}/{}", partial.name);

            let tile = Tile::parse_path(&name).map_err(|source| CompactError::Tile {
                path: name.clone(),
                source,
            })?;
            if !tile.is_partial() {
                return Err(CompactError::safety(&name, "not a partial tile"));
            }
            self.check_full_tile(full, &name)?;

            if cancel.is_cancelled() {
                return Err(CompactError::Cancelled);
            }
            let removed = self.remove_partial(&name)?;
            report.removed_files += 1;
            report.removed_bytes += removed;
        }

        if cancel.is_cancelled() {
            return Err(CompactError::Cancelled);
        }
        debug!(name = group, "removing dir");
        let path = self.root.join(group);
        fs::remove_dir(&path).map_err(|e| CompactError::io(path, e))?;
        report.removed_dirs += 1;
        Ok(())
    }

    /// Re-check the full tile with a direct `lstat`, independent of the
    /// directory listing.
    fn check_full_tile(&self, full: &str, partial: &str) -> CompactResult<()> {
        let path = self.root.join(full);
        let meta = fs::symlink_metadata(&path).map_err(|e| CompactError::io(path, e))?;
        let reason = if meta.is_dir() {
            "full tile is a directory"
        } else if !meta.file_type().is_file() {
            "full tile is not a regular file"
        } else if meta.len() == 0 {
            "full tile is empty"
        } else {
            return Ok(());
        };
        Err(CompactError::safety(partial, format!("{reason} ({full})")))
    }

    /// Clear the immutable flag and delete one partial tile. Returns its size.
    fn remove_partial(&self, name: &str) -> CompactResult<u64> {
        let path = self.root.join(name);
        let file = File::open(&path).map_err(|e| CompactError::io(&path, e))?;
        let flag = immutable::unset(&file);
        let len = file
            .metadata()
            .map_err(|e| CompactError::io(&path, e))?
            .len();
        drop(file);

        debug!(
            name,
            flag_supported = flag.supported,
            flag_cleared = flag.applied,
            "removing partial"
        );
        fs::remove_file(&path).map_err(|e| CompactError::io(&path, e))?;
        Ok(len)
    }

    /// Directory entries of `rel`, sorted by name.
    fn list(&self, rel: &str) -> CompactResult<Vec<Entry>> {
        let path = self.root.join(rel);
        let read = fs::read_dir(&path).map_err(|e| CompactError::io(&path, e))?;

        let mut entries = Vec::new();
        for entry in read {
            let entry = entry.map_err(|e| CompactError::io(&path, e))?;
            let file_type = entry.file_type().map_err(|e| CompactError::io(entry.path(), e))?;
            match entry.file_name().into_string() {
                Ok(name) => entries.push(Entry { name, file_type }),
                Err(name) => warn!(dir = rel, ?name, "skipping non-UTF-8 entry"),
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

fn require_dir(name: &str, file_type: &FileType) -> CompactResult<()> {
    if file_type.is_dir() {
        Ok(())
    } else {
        Err(CompactError::safety(name, "expected a directory"))
    }
}

/// Verify the log's checkpoint, then run one compaction pass over `root`.
pub fn compact_log(
    root: &Path,
    cancel: &CancellationToken,
    report: &mut CompactionReport,
) -> CompactResult<()> {
    let size = verified_log_size(root)?;
    info!(size, "verified log size");
    PartialCompactor::new(root, size).run(cancel, report)
}
