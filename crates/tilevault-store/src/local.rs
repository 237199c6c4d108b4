use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use prometheus::core::Collector;
use tracing::{debug, warn};

use crate::durable::{self, WriteMode};
use crate::error::{StoreError, StoreResult};
use crate::immutable::{self, FlagOutcome};
use crate::metrics::LocalMetrics;
use crate::traits::{Backend, UploadOptions};

const IMMUTABLE_MODE: u32 = 0o444;
const MUTABLE_MODE: u32 = 0o644;

/// Map a `/`-separated key to a relative path that cannot escape its root.
///
/// Rejects empty keys, leading or trailing `/`, empty elements, `.` and `..`
/// elements, backslashes and NUL bytes.
pub fn localize(key: &str) -> StoreResult<PathBuf> {
    let invalid = |reason: &str| StoreError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if key.is_empty() {
        return Err(invalid("empty key"));
    }
    if key.contains('\\') {
        return Err(invalid("backslash in key"));
    }
    if key.contains('\0') {
        return Err(invalid("NUL byte in key"));
    }

    let mut path = PathBuf::new();
    for element in key.split('/') {
        match element {
            "" => return Err(invalid("empty path element")),
            "." | ".." => return Err(invalid("relative path element")),
            _ => path.push(element),
        }
    }
    Ok(path)
}

/// Backend storing each object as a file under a root directory.
pub struct LocalBackend {
    dir: PathBuf,
    metrics: LocalMetrics,
}

impl LocalBackend {
    /// Create a backend rooted at `dir`.
    ///
    /// `dir` need not exist yet; it is created on the first upload.
    pub fn new(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        match fs::metadata(&dir) {
            Ok(meta) if !meta.is_dir() => {
                return Err(StoreError::Config(format!(
                    "local backend root {} is not a directory",
                    dir.display()
                )))
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(dir, e)),
        }
        Ok(Self {
            dir,
            metrics: LocalMetrics::new()?,
        })
    }

    /// Root directory of this backend.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn resolve(&self, key: &str) -> StoreResult<PathBuf> {
        Ok(self.dir.join(localize(key)?))
    }
}

enum Written {
    Created(Option<FlagOutcome>),
    AlreadyPresent,
    Mismatch,
}

fn upload_blocking(path: &Path, data: &[u8], immutable: bool) -> io::Result<Written> {
    if let Some(parent) = path.parent() {
        durable::create_dir_all(parent)?;
    }

    if !immutable {
        durable::write_file(path, data, MUTABLE_MODE, WriteMode::Replace)?;
        return Ok(Written::Created(None));
    }

    match durable::write_file(path, data, IMMUTABLE_MODE, WriteMode::CreateNew) {
        Ok(()) => {
            let flag = immutable::set(&File::open(path)?);
            Ok(Written::Created(Some(flag)))
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            let mut existing = File::open(path)?;
            if file_matches(&mut existing, data)? {
                Ok(Written::AlreadyPresent)
            } else {
                Ok(Written::Mismatch)
            }
        }
        Err(e) => Err(e),
    }
}

/// Compare a file's content with `expected` without reading it whole.
fn file_matches(file: &mut File, mut expected: &[u8]) -> io::Result<bool> {
    let mut buf = vec![0u8; expected.len().clamp(1, 16 * 1024)];
    loop {
        let n = match file.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if n == 0 {
            return Ok(expected.is_empty());
        }
        if n > expected.len() || buf[..n] != expected[..n] {
            return Ok(false);
        }
        expected = &expected[n..];
    }
}

fn discard_blocking(path: &Path) -> io::Result<FlagOutcome> {
    let flag = immutable::unset(&File::open(path)?);
    fs::remove_file(path)?;
    Ok(flag)
}

async fn blocking<T, F>(path: &Path, f: F) -> StoreResult<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(|e| StoreError::io(path, e)),
        Err(join) => Err(StoreError::io(path, io::Error::other(join))),
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn upload(&self, key: &str, data: Bytes, opts: &UploadOptions) -> StoreResult<()> {
        let path = self.resolve(key)?;
        let _timer = self
            .metrics
            .op_duration
            .with_label_values(&["upload"])
            .start_timer();

        let immutable = opts.immutable;
        let target = path.clone();
        let written = blocking(&path, move || upload_blocking(&target, &data, immutable)).await?;

        match written {
            Written::Created(flag) => {
                if let Some(flag) = flag {
                    debug!(
                        key,
                        supported = flag.supported,
                        applied = flag.applied,
                        "set immutable flag"
                    );
                }
                debug!(key, immutable, "wrote file");
                Ok(())
            }
            Written::AlreadyPresent => {
                warn!(key, "immutable file already exists with identical content");
                Ok(())
            }
            Written::Mismatch => Err(StoreError::ContentMismatch {
                key: key.to_string(),
            }),
        }
    }

    async fn fetch(&self, key: &str) -> StoreResult<Bytes> {
        let path = self.resolve(key)?;
        let _timer = self
            .metrics
            .op_duration
            .with_label_values(&["fetch"])
            .start_timer();

        let target = path.clone();
        let result = tokio::task::spawn_blocking(move || fs::read(target)).await;
        match result {
            Ok(Ok(data)) => Ok(Bytes::from(data)),
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            Ok(Err(e)) => Err(StoreError::io(path, e)),
            Err(join) => Err(StoreError::io(path, io::Error::other(join))),
        }
    }

    async fn discard(&self, key: &str) -> StoreResult<()> {
        let path = self.resolve(key)?;
        let _timer = self
            .metrics
            .op_duration
            .with_label_values(&["discard"])
            .start_timer();

        let target = path.clone();
        match blocking(&path, move || discard_blocking(&target)).await {
            Ok(flag) => {
                debug!(
                    key,
                    supported = flag.supported,
                    applied = flag.applied,
                    "cleared immutable flag and removed file"
                );
                Ok(())
            }
            Err(StoreError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn metrics(&self) -> Vec<Box<dyn Collector>> {
        self.metrics.collectors()
    }
}
