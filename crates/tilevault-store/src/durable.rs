//! Crash-safe filesystem writes.
//!
//! A write is visible either in full or not at all, and has reached stable
//! storage when the call returns: data goes to a temporary file in the target
//! directory, is synced, renamed into place, and the directory is synced.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

/// How [`write_file`] treats an existing target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Atomically replace any existing file.
    Replace,
    /// Fail with `io::ErrorKind::AlreadyExists` if the target exists.
    CreateNew,
}

/// Create `path` and any missing ancestors, syncing each parent that gained
/// an entry.
pub fn create_dir_all(path: &Path) -> io::Result<()> {
    let mut missing = Vec::new();
    let mut current = Some(path);
    while let Some(dir) = current {
        if dir.as_os_str().is_empty() {
            break;
        }
        match fs::metadata(dir) {
            Ok(meta) if meta.is_dir() => break,
            Ok(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists and is not a directory", dir.display()),
                ))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                missing.push(dir);
                current = dir.parent();
            }
            Err(e) => return Err(e),
        }
    }

    for dir in missing.into_iter().rev() {
        match fs::create_dir(dir) {
            Ok(()) => {}
            // Lost a race with a concurrent writer.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => continue,
            Err(e) => return Err(e),
        }
        sync_dir(parent_or_cwd(dir))?;
    }
    Ok(())
}

/// Durably write `data` to `path` with the given permission bits.
///
/// The parent directory must already exist.
pub fn write_file(path: &Path, data: &[u8], mode: u32, write_mode: WriteMode) -> io::Result<()> {
    let dir = parent_or_cwd(path);
    let mut tmp = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(dir)?;
    tmp.write_all(data)?;
    set_mode(tmp.as_file(), mode)?;
    tmp.as_file().sync_all()?;

    match write_mode {
        WriteMode::Replace => {
            tmp.persist(path).map_err(|e| e.error)?;
        }
        WriteMode::CreateNew => {
            tmp.persist_noclobber(path).map_err(|e| e.error)?;
        }
    }
    sync_dir(dir)
}

/// Flush a directory's entries to stable storage.
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
        Ok(())
    }
}

fn parent_or_cwd(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

#[cfg(unix)]
fn set_mode(file: &File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(file: &File, mode: u32) -> io::Result<()> {
    let mut perms = file.metadata()?.permissions();
    perms.set_readonly(mode & 0o222 == 0);
    file.set_permissions(perms)
}
