//! Tile manifest (`tile_config.txt`) for downstream stitching.
//!
//! One line per tile, appended in event order:
//!
//! ```text
//! pos_0000.tif; ; (100.0,200.0)
//! pos_0001.tif; ; (350.0,200.0)
//! ```

use crate::tile_identity::TileId;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tilescan_core::{ScanResult, TileScanError};

/// Manifest file name inside the save directory.
pub const TILE_CONFIG_FILE: &str = "tile_config.txt";

/// Manifest line for a tile at stage coordinates `(x, y)`.
pub fn tile_config_line(basename: &str, x: f64, y: f64) -> String {
    format!("{basename}.tif; ; ({x:?},{y:?})")
}

/// Append-only writer of the tile manifest.
#[derive(Debug, Clone)]
pub struct TileConfigRecorder {
    manifest: PathBuf,
}

impl TileConfigRecorder {
    /// Recorder writing `<base>/tile_config.txt`.
    pub fn new(base: &Path) -> Self {
        Self {
            manifest: base.join(TILE_CONFIG_FILE),
        }
    }

    /// Path of the manifest file.
    pub fn manifest_path(&self) -> &Path {
        &self.manifest
    }

    /// Append the line for `tile` at `(x, y)`.
    ///
    /// # Errors
    ///
    /// - [`TileScanError::PreexistingManifest`] if `tile` is the first of the
    ///   run and the manifest already exists
    /// - [`TileScanError::Io`] if the append fails
    pub fn record(&self, tile: &TileId, x: f64, y: f64) -> ScanResult<()> {
        if tile.is_first() && self.manifest.exists() {
            return Err(TileScanError::PreexistingManifest {
                path: self.manifest.clone(),
            });
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.manifest)?;
        writeln!(file, "{}", tile_config_line(tile.basename(), x, y))?;
        Ok(())
    }
}
