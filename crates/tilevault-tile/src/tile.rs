use std::fmt;
use std::ops::Range;

use crate::error::{TileError, TileResult};

/// Height of every tile: each tile holds `2^TILE_HEIGHT` hashes or entries.
pub const TILE_HEIGHT: u32 = 8;

/// Number of entries in a full tile.
pub const TILE_WIDTH: u32 = 1 << TILE_HEIGHT;

/// Suffix of the directory that groups the partial versions of a tile.
pub const PARTIAL_SUFFIX: &str = ".p";

/// Prefix of fan-out directory segments. Such segments are never tiles.
pub const TRAVERSAL_MARKER: char = 'x';

const TILE_ROOT: &str = "tile";
const DATA_LEVEL: &str = "data";
const MAX_LEVEL: u8 = 63;

/// The level a tile lives at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TileLevel {
    /// Leaf data tiles, stored under `tile/data/`. They cover the same
    /// leaf ranges as level-0 hash tiles.
    Data,
    /// Hash tiles at the given level (0 is the lowest).
    Hash(u8),
}

impl TileLevel {
    /// The level used for size computations. Data tiles count as level 0.
    pub fn height_index(self) -> u32 {
        match self {
            Self::Data => 0,
            Self::Hash(level) => u32::from(level),
        }
    }
}

impl fmt::Display for TileLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => f.write_str(DATA_LEVEL),
            Self::Hash(level) => write!(f, "{level}"),
        }
    }
}

/// Number of leaves covered by one tile at `level`, or `None` if it does not
/// fit in a `u64`.
pub fn tile_size(level: TileLevel) -> Option<u64> {
    let shift = TILE_HEIGHT.checked_mul(level.height_index() + 1)?;
    1u64.checked_shl(shift)
}

/// Encode a tile index into nested fan-out path segments.
///
/// ```
/// use tilevault_tile::fan_out;
///
/// assert_eq!(fan_out(5), "005");
/// assert_eq!(fan_out(1234067), "x001/x234/067");
/// ```
pub fn fan_out(index: u64) -> String {
    let mut n = index;
    let mut encoded = format!("{:03}", n % 1000);
    while n >= 1000 {
        n /= 1000;
        encoded = format!("{TRAVERSAL_MARKER}{:03}/{encoded}", n % 1000);
    }
    encoded
}

/// A tile identity: level, index within the level, and width.
///
/// A width of [`TILE_WIDTH`] is a full tile; anything smaller is a partial
/// tile that the log may later replace with a wider one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tile {
    pub level: TileLevel,
    pub index: u64,
    pub width: u32,
}

impl Tile {
    /// A full tile.
    pub fn full(level: TileLevel, index: u64) -> Self {
        Self {
            level,
            index,
            width: TILE_WIDTH,
        }
    }

    /// A tile of the given width. Fails unless `1 <= width <= TILE_WIDTH`.
    pub fn with_width(level: TileLevel, index: u64, width: u32) -> TileResult<Self> {
        if width == 0 || width > TILE_WIDTH {
            return Err(TileError::InvalidWidth {
                width,
                max: TILE_WIDTH,
            });
        }
        Ok(Self {
            level,
            index,
            width,
        })
    }

    /// Returns `true` if the tile holds fewer than [`TILE_WIDTH`] entries.
    pub fn is_partial(&self) -> bool {
        self.width < TILE_WIDTH
    }

    /// The full tile at the same coordinates.
    pub fn to_full(self) -> Self {
        Self::full(self.level, self.index)
    }

    /// The leaf range covered by this tile, `None` on overflow.
    pub fn covered_range(&self) -> Option<Range<u64>> {
        let size = tile_size(self.level)?;
        let start = self.index.checked_mul(size)?;
        let end = start.checked_add(size)?;
        Some(start..end)
    }

    /// The layout path this tile is stored under.
    pub fn path(&self) -> String {
        let mut path = format!("{TILE_ROOT}/{}/{}", self.level, fan_out(self.index));
        if self.is_partial() {
            path.push_str(PARTIAL_SUFFIX);
            path.push('/');
            path.push_str(&self.width.to_string());
        }
        path
    }

    /// Parse a layout path produced by [`Tile::path`].
    ///
    /// Parsing is strict: non-canonical numbers, stray segments and widths
    /// outside `1..=TILE_WIDTH` are errors rather than defaults. A partial
    /// group entry named `256` parses as a full-width tile so that callers
    /// can notice it.
    pub fn parse_path(path: &str) -> TileResult<Self> {
        let rest = path
            .strip_prefix(TILE_ROOT)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| malformed(path, "missing tile/ prefix"))?;

        let mut segments: Vec<&str> = rest.split('/').collect();
        if segments.len() < 2 {
            return Err(malformed(path, "missing tile index"));
        }
        let level = parse_level(path, segments[0])?;

        let mut width = TILE_WIDTH;
        let n = segments.len();
        if n >= 3 {
            if let Some(stripped) = segments[n - 2].strip_suffix(PARTIAL_SUFFIX) {
                width = parse_width(path, segments[n - 1])?;
                segments[n - 2] = stripped;
                segments.pop();
            }
        }

        let index = parse_index(path, &segments[1..])?;
        Ok(Self {
            level,
            index,
            width,
        })
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

fn malformed(path: &str, reason: impl Into<String>) -> TileError {
    TileError::MalformedPath {
        path: path.to_string(),
        reason: reason.into(),
    }
}

/// Canonical decimal: digits only, no leading zeros unless the value is 0.
fn parse_decimal(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    s.parse().ok()
}

fn parse_level(path: &str, segment: &str) -> TileResult<TileLevel> {
    if segment == DATA_LEVEL {
        return Ok(TileLevel::Data);
    }
    match parse_decimal(segment) {
        Some(level) if level <= u64::from(MAX_LEVEL) => Ok(TileLevel::Hash(level as u8)),
        _ => Err(malformed(path, format!("invalid level {segment:?}"))),
    }
}

fn parse_width(path: &str, segment: &str) -> TileResult<u32> {
    let width = parse_decimal(segment)
        .ok_or_else(|| malformed(path, format!("invalid partial width {segment:?}")))?;
    if width == 0 || width > u64::from(TILE_WIDTH) {
        return Err(TileError::InvalidWidth {
            width: u32::try_from(width).unwrap_or(u32::MAX),
            max: TILE_WIDTH,
        });
    }
    Ok(width as u32)
}

fn parse_group(segment: &str) -> Option<u64> {
    if segment.len() != 3 || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

fn parse_index(path: &str, segments: &[&str]) -> TileResult<u64> {
    let Some((last, traversal)) = segments.split_last() else {
        return Err(malformed(path, "missing tile index"));
    };

    let mut index: u64 = 0;
    for (i, segment) in traversal.iter().enumerate() {
        let group = segment
            .strip_prefix(TRAVERSAL_MARKER)
            .and_then(parse_group)
            .ok_or_else(|| malformed(path, format!("invalid fan-out segment {segment:?}")))?;
        if i == 0 && group == 0 {
            return Err(malformed(path, "non-canonical leading fan-out segment"));
        }
        index = index
            .checked_mul(1000)
            .and_then(|n| n.checked_add(group))
            .ok_or_else(|| TileError::IndexOverflow(path.to_string()))?;
    }

    let group = parse_group(last)
        .ok_or_else(|| malformed(path, format!("invalid index segment {last:?}")))?;
    index
        .checked_mul(1000)
        .and_then(|n| n.checked_add(group))
        .ok_or_else(|| TileError::IndexOverflow(path.to_string()))
}
