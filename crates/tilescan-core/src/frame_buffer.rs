//! Materialised frame stack for one acquisition event.
//!
//! The hardware yields frames lazily; the event handler drains that stream
//! into a [`FrameBuffer`] before anything inspects it. The buffer guarantees
//! at least one frame and a common shape, and exposes the de-accumulated view
//! used for overload detection.
//!
//! # De-accumulation
//!
//! FLIM acquisitions accumulate photon counts across frames, so frame `i`
//! contains everything counted in frames `0..=i`. The de-accumulated view
//! turns that back into per-frame deltas:
//!
//! ```text
//! delta[0] = frame[0]
//! delta[i] = frame[i] - frame[i - 1]     (signed, no clamping)
//! ```

use crate::capabilities::FrameStream;
use crate::data::{DeltaImage, Frame};
use crate::error::{ScanResult, TileScanError};
use futures::TryStreamExt;

/// Ordered, non-empty, same-shape frames of one event.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    frames: Vec<Frame>,
    shape: (usize, usize),
}

impl FrameBuffer {
    /// Build a buffer from frames in acquisition order.
    ///
    /// # Errors
    ///
    /// - [`TileScanError::EmptyFrameSet`] if `frames` is empty
    /// - [`TileScanError::ShapeMismatch`] if any frame differs in shape from frame 0
    pub fn from_frames(frames: Vec<Frame>) -> ScanResult<Self> {
        let first = frames.first().ok_or(TileScanError::EmptyFrameSet)?;
        let shape = first.shape();

        if let Some((index, frame)) = frames
            .iter()
            .enumerate()
            .find(|(_, frame)| frame.shape() != shape)
        {
            return Err(TileScanError::ShapeMismatch {
                index,
                expected: shape,
                found: frame.shape(),
            });
        }

        Ok(Self { frames, shape })
    }

    /// Drain a hardware frame stream completely, then validate it.
    ///
    /// A stream error is a hardware failure of `execute_event`.
    pub async fn drain(stream: FrameStream) -> ScanResult<Self> {
        let frames: Vec<Frame> =
            stream
                .try_collect()
                .await
                .map_err(|source| TileScanError::Hardware {
                    operation: "execute_event",
                    source,
                })?;
        Self::from_frames(frames)
    }

    /// Raw frames in acquisition order.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Consume the buffer, returning the raw frames.
    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    /// Number of frames (always at least 1).
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Always false; a buffer is never empty.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Common frame shape as `(height, width)`.
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    /// Lazily computed de-accumulated view, one delta image per frame.
    pub fn deaccumulated_iter(&self) -> impl Iterator<Item = DeltaImage> + '_ {
        self.frames.iter().enumerate().map(move |(i, frame)| {
            let current = frame.image.mapv(i32::from);
            match i.checked_sub(1).map(|prev| &self.frames[prev]) {
                Some(previous) => current - &previous.image.mapv(i32::from),
                None => current,
            }
        })
    }

    /// De-accumulated view, same length as the buffer.
    pub fn deaccumulated(&self) -> Vec<DeltaImage> {
        self.deaccumulated_iter().collect()
    }
}
