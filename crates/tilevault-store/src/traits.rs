use async_trait::async_trait;
use bytes::Bytes;
use prometheus::core::Collector;

use crate::error::StoreResult;

/// Content type used when [`UploadOptions::content_type`] is unset.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Per-upload options.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadOptions {
    /// Create-if-absent semantics. An existing object must match byte for
    /// byte, otherwise the upload fails with `ContentMismatch`.
    pub immutable: bool,
    /// The payload is gzip-encoded.
    pub compressed: bool,
    /// Overrides [`DEFAULT_CONTENT_TYPE`].
    pub content_type: Option<String>,
}

impl UploadOptions {
    /// Options for an immutable object.
    pub fn immutable() -> Self {
        Self {
            immutable: true,
            ..Self::default()
        }
    }

    /// Mark the payload as gzip-encoded.
    pub fn compressed(mut self) -> Self {
        self.compressed = true;
        self
    }

    /// Set an explicit content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// The effective content type.
    pub fn content_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}

/// Storage backend for log objects.
///
/// All implementations must satisfy these invariants:
/// - An immutable key, once written, never changes. Re-uploading identical
///   bytes is a no-op success; different bytes are rejected and the stored
///   object is left untouched.
/// - `fetch` returns exactly the bytes last written, and reports a missing
///   object as `StoreError::NotFound`.
/// - `discard` succeeds on immutable objects.
/// - Calls for distinct keys may run concurrently without coordination.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Store `data` under `key`.
    async fn upload(&self, key: &str, data: Bytes, opts: &UploadOptions) -> StoreResult<()>;

    /// Read the object stored under `key`.
    async fn fetch(&self, key: &str) -> StoreResult<Bytes>;

    /// Remove the object stored under `key`.
    async fn discard(&self, key: &str) -> StoreResult<()>;

    /// Instrumentation series for external registration.
    fn metrics(&self) -> Vec<Box<dyn Collector>>;
}
