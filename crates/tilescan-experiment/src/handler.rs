//! Per-event orchestration with PMT overload checking.
//!
//! [`AcquisitionEventHandler`] wraps any [`HardwareEngine`] and runs every
//! event through the same steps:
//!
//! 1. take the next [`TileId`]
//! 2. label the instrument output with its prefix, execute, drain the frames
//! 3. rename the instrument's `_0000` files to the tile prefix
//! 4. append the tile to the manifest
//! 5. de-accumulate and check for a shut-off PMT, recovering on the first hit
//! 6. hand the frames back to the caller
//!
//! Steps 3 and 4 only happen when the run has a save directory.

use crate::recovery::{RecoveryProtocol, RecoveryReport};
use crate::tile_config::TileConfigRecorder;
use crate::tile_identity::{TileCounter, TileId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tilescan_core::{
    AcquisitionEvent, FrameBuffer, HardwareEngine, OverloadDetector, ScanResult, TileScanError,
    INSTRUMENT_FILE_EXTENSIONS, PENDING_FILE_SUFFIX,
};
use tracing::{debug, warn};

/// Result of one handled event.
#[derive(Debug)]
pub struct TileOutcome {
    /// Identity assigned to the event.
    pub tile: TileId,
    /// The event that was executed.
    pub event: AcquisitionEvent,
    /// All frames of the event, including any acquired after a trip.
    pub frames: FrameBuffer,
    /// Index of the first de-accumulated frame that looked shut off.
    pub shut_off_frame: Option<usize>,
    /// Recovery performed after this event, if any.
    pub recovery: Option<RecoveryReport>,
}

/// Rename `<prefix>_0000.<ext>` to `<prefix>.<ext>` for every instrument file.
///
/// A missing file is an error.
pub fn finalize_instrument_files(prefix: &Path) -> ScanResult<Vec<PathBuf>> {
    INSTRUMENT_FILE_EXTENSIONS
        .iter()
        .map(|ext| {
            let pending = PathBuf::from(format!("{}{PENDING_FILE_SUFFIX}.{ext}", prefix.display()));
            let finished = PathBuf::from(format!("{}.{ext}", prefix.display()));
            std::fs::rename(&pending, &finished)?;
            Ok(finished)
        })
        .collect()
}

/// Runs acquisition events one at a time against a hardware engine.
pub struct AcquisitionEventHandler {
    engine: Arc<dyn HardwareEngine>,
    save_dir: Option<PathBuf>,
    counter: TileCounter,
    manifest: Option<TileConfigRecorder>,
    detector: OverloadDetector,
    recovery: RecoveryProtocol,
}

impl AcquisitionEventHandler {
    /// Handler writing into `save_dir`, or only acquiring when `None`.
    pub fn new(
        engine: Arc<dyn HardwareEngine>,
        save_dir: Option<PathBuf>,
        recovery: RecoveryProtocol,
    ) -> Self {
        let manifest = save_dir.as_deref().map(TileConfigRecorder::new);
        Self {
            engine,
            save_dir,
            counter: TileCounter::new(),
            manifest,
            detector: OverloadDetector::new(),
            recovery,
        }
    }

    /// Use a different shut-off detector.
    pub fn with_detector(mut self, detector: OverloadDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Tiles handed out so far.
    pub fn tiles_issued(&self) -> u32 {
        self.counter.issued()
    }

    /// Manifest writer, when saving.
    pub fn manifest(&self) -> Option<&TileConfigRecorder> {
        self.manifest.as_ref()
    }

    /// Execute one event and check it for a shut-off PMT.
    ///
    /// # Errors
    ///
    /// Every error is fatal to the run:
    /// - [`TileScanError::Hardware`] if labelling or execution fails
    /// - [`TileScanError::EmptyFrameSet`] / [`TileScanError::ShapeMismatch`] for bad frame stacks
    /// - [`TileScanError::Io`] if an instrument file is missing or the manifest cannot be written
    /// - [`TileScanError::PreexistingManifest`] on the first tile of a reused directory
    /// - [`TileScanError::RecoveryFailed`] if the detector cannot be reset
    pub async fn handle_event(&mut self, event: &AcquisitionEvent) -> ScanResult<TileOutcome> {
        let tile = self.counter.next_tile(self.save_dir.as_deref());
        debug!(tile = %tile, index = %event.index, "Handling event");

        self.engine
            .set_output_label(tile.prefix())
            .await
            .map_err(|source| TileScanError::Hardware {
                operation: "set_output_label",
                source,
            })?;
        let stream = self
            .engine
            .execute_event(event)
            .await
            .map_err(|source| TileScanError::Hardware {
                operation: "execute_event",
                source,
            })?;
        let frames = FrameBuffer::drain(stream).await?;

        if self.save_dir.is_some() {
            finalize_instrument_files(tile.prefix())?;
        }
        if let Some(manifest) = &self.manifest {
            manifest.record(&tile, event.position.x, event.position.y)?;
        }

        let shut_off_frame = self.detector.first_shut_off(&frames);
        let recovery = match shut_off_frame {
            Some(frame) => {
                warn!(
                    tile = %tile,
                    position = event.index.position,
                    frame,
                    "Resetting PMT at position {} at (x, y) = ({:?}, {:?})",
                    event.index.position,
                    event.position.x,
                    event.position.y
                );
                Some(self.recovery.run(self.engine.as_ref()).await?)
            }
            None => None,
        };

        Ok(TileOutcome {
            tile,
            event: event.clone(),
            frames,
            shut_off_frame,
            recovery,
        })
    }
}
