//! Storage backends for tiled transparency logs.
//!
//! Every backend implements the [`Backend`] trait: upload, fetch, discard
//! and metrics. Keys are `/`-separated strings chosen by the caller; each
//! backend maps them onto its own namespace.
//!
//! # Storage Backends
//!
//! - [`LocalBackend`] -- durable writes to a local directory, with a
//!   best-effort OS immutable flag on immutable objects
//! - [`ObjectBackend`] -- object storage through the `object_store` crate,
//!   with per-attempt error classification and hedged writes
//!
//! # Design Rules
//!
//! 1. An immutable key never silently changes: re-uploading identical bytes
//!    succeeds, different bytes fail with [`StoreError::ContentMismatch`].
//! 2. Local writes are atomic and flushed to stable storage before returning.
//! 3. Keys never escape the backend's root: invalid keys are rejected before
//!    any I/O.
//! 4. Backend-native error types never reach the caller unwrapped.

pub mod durable;
pub mod error;
pub mod immutable;
pub mod local;
pub mod metrics;
pub mod object;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use immutable::FlagOutcome;
pub use local::{localize, LocalBackend};
pub use object::{
    classify_error, ObjectBackend, ObjectClient, RetryPolicy, S3Config, StoreClient,
    DEFAULT_HEDGE_DELAY, IMMUTABLE_CACHE_CONTROL,
};
pub use traits::{Backend, UploadOptions, DEFAULT_CONTENT_TYPE};
