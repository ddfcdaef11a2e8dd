//! PMT shut-off detection.
//!
//! When the PMT trips its overload protection it stops emitting counts. In a
//! de-accumulated frame this shows up as a run of exact zeros. Only the
//! trailing window of the flattened frame is scanned: it is cheap and it
//! avoids artifacts at the start of a scan line.

use crate::data::DeltaImage;
use crate::frame_buffer::FrameBuffer;
use ndarray::{ArrayBase, Data, Dimension};

/// Number of trailing samples inspected (64 lines of a 256-pixel scan).
pub const OVERLOAD_WINDOW: usize = 16384;

/// Pure shut-off detector over de-accumulated frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverloadDetector {
    window: usize,
}

impl Default for OverloadDetector {
    fn default() -> Self {
        Self {
            window: OVERLOAD_WINDOW,
        }
    }
}

impl OverloadDetector {
    /// Detector with the standard trailing window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Detector with a custom trailing window.
    pub fn with_window(window: usize) -> Self {
        Self { window }
    }

    /// Trailing window size in samples.
    pub fn window(&self) -> usize {
        self.window
    }

    /// True iff every sample in the trailing window is exactly zero.
    ///
    /// Samples are taken in raster order regardless of memory layout. Frames
    /// smaller than the window are checked over their whole extent.
    pub fn looks_shut_off<S, D>(&self, image: &ArrayBase<S, D>) -> bool
    where
        S: Data<Elem = i32>,
        D: Dimension,
    {
        let skip = image.len().saturating_sub(self.window);
        image.iter().skip(skip).all(|&v| v == 0)
    }

    /// Index of the first frame whose de-accumulated image looks shut off.
    ///
    /// Stops computing deltas at the first hit.
    pub fn first_shut_off(&self, buffer: &FrameBuffer) -> Option<usize> {
        buffer
            .deaccumulated_iter()
            .position(|delta: DeltaImage| self.looks_shut_off(&delta))
    }
}
