//! Multi-page TIFF export of a tile's frame stack.
//!
//! One page per frame, 16-bit grayscale, raw cumulative counts. Each page
//! carries an `ImageDescription` tag with the stage position and event index
//! so the stack can be stitched without the tile config.
//!
//! ```rust,ignore
//! use tilescan_storage::TiffStackWriter;
//!
//! let path = TiffStackWriter::write_stack(buffer.frames(), "run/pos_0003.tif")?;
//! ```

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;
use tilescan_core::capabilities::FrameStackSink;
use tilescan_core::{Frame, FrameBuffer};

/// Writes each tile's frames to `<tile prefix>.tif`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TiffStackWriter;

impl TiffStackWriter {
    /// Create a writer.
    pub fn new() -> Self {
        Self
    }

    /// Path the stack for `tile_prefix` is written to.
    pub fn stack_path(tile_prefix: &Path) -> PathBuf {
        PathBuf::from(format!("{}.tif", tile_prefix.display()))
    }

    /// Write `frames` as a multi-page TIFF at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `frames` is empty
    /// - frames differ in shape
    /// - the file cannot be created or encoding fails
    pub fn write_stack<P: AsRef<Path>>(frames: &[Frame], path: P) -> Result<()> {
        let path = path.as_ref();
        let first = frames
            .first()
            .ok_or_else(|| anyhow!("Cannot write empty frame stack"))?;
        let (height, width) = first.shape();

        if let Some((i, frame)) = frames
            .iter()
            .enumerate()
            .find(|(_, f)| f.shape() != (height, width))
        {
            return Err(anyhow!(
                "Frame {} has inconsistent dimensions: {:?} vs expected {:?}",
                i,
                frame.shape(),
                (height, width)
            ));
        }

        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        let mut encoder = TiffEncoder::new(BufWriter::new(file))
            .with_context(|| format!("Failed to start TIFF at {:?}", path))?;

        for (i, frame) in frames.iter().enumerate() {
            let data: Vec<u16> = frame.image.iter().copied().collect();
            let description = serde_json::json!({
                "frame": i,
                "position": frame.position,
                "index": { "p": frame.index.position, "t": frame.index.time },
            })
            .to_string();

            let mut page = encoder
                .new_image::<colortype::Gray16>(width as u32, height as u32)
                .with_context(|| format!("Failed to add page {} to {:?}", i, path))?;
            page.encoder()
                .write_tag(Tag::ImageDescription, description.as_str())?;
            page.write_data(&data)
                .with_context(|| format!("Failed to encode page {} of {:?}", i, path))?;
        }

        tracing::debug!(
            path = ?path,
            num_frames = frames.len(),
            dimensions = format!("{}x{}", width, height),
            "Wrote TIFF stack"
        );

        Ok(())
    }
}

impl FrameStackSink for TiffStackWriter {
    fn persist(&self, tile_prefix: &Path, frames: &FrameBuffer) -> Result<PathBuf> {
        let path = Self::stack_path(tile_prefix);
        Self::write_stack(frames.frames(), &path)?;
        Ok(path)
    }
}
