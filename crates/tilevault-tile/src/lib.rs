//! Tile addressing for tiled transparency logs.
//!
//! A log's Merkle tree is stored as fixed-height tiles. This crate maps a
//! logical tile identity to the hierarchical path it is stored under, and
//! back. It has no I/O and no dependencies beyond error derivation.
//!
//! # Layout
//!
//! ```text
//! tile/<L>/<fan-out N>          full hash tile at level L
//! tile/<L>/<fan-out N>.p/<W>    partial hash tile of width W
//! tile/data/<fan-out N>[.p/<W>] leaf data tile
//! ```
//!
//! The fan-out encoding splits the index into groups of three digits. All
//! groups but the last are directories prefixed with [`TRAVERSAL_MARKER`]:
//! index `1234067` is stored as `x001/x234/067`.
//!
//! # Key Types
//!
//! - [`Tile`] -- a `(level, index, width)` triple
//! - [`TileLevel`] -- data tiles or hash tiles at a numeric level
//! - [`tile_size`] -- number of leaves a tile at a given level covers

pub mod error;
pub mod tile;

pub use error::{TileError, TileResult};
pub use tile::{
    fan_out, tile_size, Tile, TileLevel, PARTIAL_SUFFIX, TILE_HEIGHT, TILE_WIDTH,
    TRAVERSAL_MARKER,
};
