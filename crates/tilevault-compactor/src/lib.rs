//! Partial tile compaction.
//!
//! A log writes partial tiles (`<N>.p/<W>`) while the right edge of the tree
//! grows, then a full tile `<N>` once 256 entries are in. The partials are
//! redundant from then on. [`PartialCompactor`] walks a local log directory
//! and deletes them, but only when all of these hold:
//!
//! 1. a full tile with the same name sits next to the partial group;
//! 2. the tile lies entirely left of the verified tree size;
//! 3. each file in the group parses as a tile narrower than 256;
//! 4. a fresh `lstat` of the full tile shows a non-empty regular file.
//!
//! The first failed check on an otherwise deletable group aborts the pass.
//!
//! # Key Types
//!
//! - [`PartialCompactor`] -- one pass over one log directory
//! - [`CompactionReport`] -- removed file, directory and byte counts
//! - [`compact_log`] -- verify the checkpoint, then compact

pub mod compactor;
pub mod error;
pub mod report;

pub use compactor::{compact_log, EntryKind, PartialCompactor};
pub use error::{CompactError, CompactResult};
pub use report::CompactionReport;
