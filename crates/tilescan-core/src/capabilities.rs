//! Hardware capabilities consumed by the acquisition loop.
//!
//! A scanning microscope is driven through a handful of small capability
//! traits instead of one monolithic device interface:
//!
//! - [`EventExecutor`] runs one acquisition event and yields its frames
//! - [`OutputLabeling`] names the instrument files of the next event
//! - [`DetectorControl`] switches the PMT high voltage and clears its overload latch
//! - [`ShutterControl`] opens and closes the excitation shutter
//! - [`Configurable`] applies the one-shot [`DeviceSetup`]
//!
//! [`HardwareEngine`] bundles all of them and is implemented automatically
//! for any type that provides every capability. The acquisition loop composes
//! with a `HardwareEngine` rather than extending one, so the overload check
//! wraps any conforming engine.
//!
//! Each capability trait is async (`#[async_trait]`), `Send + Sync`, and
//! reports failures as `anyhow::Result`.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn snap<E: HardwareEngine + ?Sized>(engine: &E, event: &AcquisitionEvent) -> Result<FrameBuffer> {
//!     engine.set_output_label(Path::new("run/pos_0000")).await?;
//!     let stream = engine.execute_event(event).await?;
//!     Ok(FrameBuffer::drain(stream).await?)
//! }
//! ```

use crate::data::{AcquisitionEvent, Frame};
use crate::frame_buffer::FrameBuffer;
use crate::setup::DeviceSetup;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::path::{Path, PathBuf};

/// Suffix the instrument appends to the output label until files are finalised.
pub const PENDING_FILE_SUFFIX: &str = "_0000";

/// Extensions of the per-tile files a FLIM instrument writes under its label.
pub const INSTRUMENT_FILE_EXTENSIONS: [&str; 3] = ["spc", "sdt", "json"];

/// Lazy, finite, non-restartable sequence of frames for one event.
///
/// Must be drained exactly once before any random-access inspection.
pub type FrameStream = BoxStream<'static, Result<Frame>>;

/// Capability: execute a single acquisition event.
#[async_trait]
pub trait EventExecutor: Send + Sync {
    /// Move to the event's position, acquire, and return the frames.
    ///
    /// The stream yields `event.frame_count` frames in acquisition order.
    async fn execute_event(&self, event: &AcquisitionEvent) -> Result<FrameStream>;
}

/// Capability: label the instrument files written for the next event.
#[async_trait]
pub trait OutputLabeling: Send + Sync {
    /// Set the file-name prefix the instrument writes its next files under.
    ///
    /// Files land at `<prefix>_0000.<ext>` until renamed.
    async fn set_output_label(&self, prefix: &Path) -> Result<()>;
}

/// Capability: PMT high-voltage and overload control.
#[async_trait]
pub trait DetectorControl: Send + Sync {
    /// Switch the detector high-voltage supply on or off.
    async fn set_detector_power(&self, on: bool) -> Result<()>;

    /// Clear the latched overload condition.
    ///
    /// Not guaranteed to take effect synchronously.
    async fn clear_detector_overload(&self) -> Result<()>;
}

/// Capability: excitation shutter.
#[async_trait]
pub trait ShutterControl: Send + Sync {
    /// Open the shutter.
    async fn open_shutter(&self) -> Result<()>;

    /// Close the shutter.
    async fn close_shutter(&self) -> Result<()>;
}

/// Capability: one-shot static configuration.
#[async_trait]
pub trait Configurable: Send + Sync {
    /// Apply the device setup. Called once before the run.
    async fn apply_setup(&self, setup: &DeviceSetup) -> Result<()>;
}

/// Everything the acquisition loop needs from the hardware.
pub trait HardwareEngine:
    EventExecutor + OutputLabeling + DetectorControl + ShutterControl + Configurable
{
}

impl<T> HardwareEngine for T where
    T: EventExecutor + OutputLabeling + DetectorControl + ShutterControl + Configurable
{
}

/// Downstream persistence of a tile's combined frame stack.
///
/// Failures are warnings: the instrument-native per-tile files remain.
pub trait FrameStackSink: Send + Sync {
    /// Persist `frames` for the tile whose prefix is `tile_prefix`.
    ///
    /// Returns the path written.
    fn persist(&self, tile_prefix: &Path, frames: &FrameBuffer) -> Result<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{EventIndex, Image, Position};
    use futures::StreamExt;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Stub {
        powered: AtomicBool,
    }

    #[async_trait]
    impl EventExecutor for Stub {
        async fn execute_event(&self, event: &AcquisitionEvent) -> Result<FrameStream> {
            let frames: Vec<Result<Frame>> = (0..event.frame_count)
                .map(|_| Ok(Frame::new(Image::zeros((2, 2)), event)))
                .collect();
            Ok(futures::stream::iter(frames).boxed())
        }
    }

    #[async_trait]
    impl OutputLabeling for Stub {
        async fn set_output_label(&self, _prefix: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl DetectorControl for Stub {
        async fn set_detector_power(&self, on: bool) -> Result<()> {
            self.powered.store(on, Ordering::SeqCst);
            Ok(())
        }

        async fn clear_detector_overload(&self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl ShutterControl for Stub {
        async fn open_shutter(&self) -> Result<()> {
            Ok(())
        }

        async fn close_shutter(&self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Configurable for Stub {
        async fn apply_setup(&self, _setup: &DeviceSetup) -> Result<()> {
            Ok(())
        }
    }

    async fn run_generic<E: HardwareEngine + ?Sized>(engine: &E) -> usize {
        engine.set_detector_power(true).await.unwrap();
        let event = AcquisitionEvent {
            sequence: 0,
            index: EventIndex::default(),
            position: Position::new(0.0, 0.0, 0.0),
            frame_count: 3,
        };
        let stream = engine.execute_event(&event).await.unwrap();
        stream.count().await
    }

    #[tokio::test]
    async fn test_blanket_hardware_engine() {
        let stub = Stub {
            powered: AtomicBool::new(false),
        };
        assert_eq!(run_generic(&stub).await, 3);
        assert!(stub.powered.load(Ordering::SeqCst));

        let as_dyn: &dyn HardwareEngine = &stub;
        assert_eq!(run_generic(as_dyn).await, 3);
    }
}
