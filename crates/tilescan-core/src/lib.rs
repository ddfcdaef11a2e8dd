//! `tilescan-core`
//!
//! Core types and traits for tiled laser-scanning acquisition.
//!
//! This crate holds the pieces of the acquisition loop that have no side
//! effects of their own: the data model, the error taxonomy, the hardware
//! capability traits, and the frame processing used to detect a PMT that has
//! shut itself off.
//!
//! ## Key Types
//!
//! - [`data::AcquisitionEvent`]: one scheduled stage position to acquire
//! - [`data::Frame`]: one image yielded by the hardware for an event
//! - [`frame_buffer::FrameBuffer`]: materialised frame stack with the de-accumulated view
//! - [`overload::OverloadDetector`]: trailing-window zero check on de-accumulated frames
//! - [`capabilities::HardwareEngine`]: everything the loop needs from the instrument
//! - [`error::TileScanError`]: startup, fatal, and warning-class errors

pub mod capabilities;
pub mod data;
pub mod error;
pub mod frame_buffer;
pub mod overload;
pub mod setup;

pub use capabilities::{
    Configurable, DetectorControl, EventExecutor, FrameStackSink, FrameStream, HardwareEngine,
    OutputLabeling, ShutterControl, INSTRUMENT_FILE_EXTENSIONS, PENDING_FILE_SUFFIX,
};
pub use data::{AcquisitionEvent, DeltaImage, EventIndex, Frame, Image, Position, RecoveryState};
pub use error::{DriverError, DriverErrorKind, ScanResult, TileScanError};
pub use frame_buffer::FrameBuffer;
pub use overload::{OverloadDetector, OVERLOAD_WINDOW};
pub use setup::{DeviceSetup, ScanResolution};
