//! Tile numbering and file prefixes.
//!
//! Every event gets exactly one [`TileId`], taken from the run's
//! [`TileCounter`] before the instrument is told where to write. The same
//! `TileId` is then used for the hardware label, the file rename, and the
//! manifest line, so those three can never disagree.

use std::fmt;
use std::path::{Path, PathBuf};

/// File-name stem shared by all tiles.
pub const TILE_STEM: &str = "pos_";

/// Basename of tile `counter`: `pos_0000`, `pos_0001`, ...
pub fn tile_basename(counter: u32) -> String {
    format!("{TILE_STEM}{counter:04}")
}

/// Prefix for tile `counter` inside `base`, or the bare basename without one.
pub fn tile_prefix(base: Option<&Path>, counter: u32) -> PathBuf {
    let basename = tile_basename(counter);
    match base {
        Some(dir) => dir.join(basename),
        None => PathBuf::from(basename),
    }
}

/// Identity of one tile, fixed for the lifetime of its event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileId {
    counter: u32,
    basename: String,
    prefix: PathBuf,
}

impl TileId {
    /// Identity for tile `counter` under `base`.
    pub fn new(base: Option<&Path>, counter: u32) -> Self {
        Self {
            counter,
            basename: tile_basename(counter),
            prefix: tile_prefix(base, counter),
        }
    }

    /// Zero-based tile number.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// `pos_####`.
    pub fn basename(&self) -> &str {
        &self.basename
    }

    /// Full prefix handed to the instrument and used for renames.
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// True for the first tile of a run.
    pub fn is_first(&self) -> bool {
        self.counter == 0
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.basename)
    }
}

/// Monotonic per-run tile counter.
///
/// Owned by the event handler; nothing else advances it.
#[derive(Debug, Default)]
pub struct TileCounter {
    next: u32,
}

impl TileCounter {
    /// Counter starting at tile 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next tile number.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> u32 {
        let current = self.next;
        self.next += 1;
        current
    }

    /// Take the next tile number as a [`TileId`] under `base`.
    pub fn next_tile(&mut self, base: Option<&Path>) -> TileId {
        TileId::new(base, self.next())
    }

    /// Number of tiles handed out so far.
    pub fn issued(&self) -> u32 {
        self.next
    }
}
