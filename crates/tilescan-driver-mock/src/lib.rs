//! Simulated scanning FLIM hardware for tilescan.
//!
//! This crate provides a [`MockScanEngine`] that implements every hardware
//! capability the acquisition loop needs, so the full loop can run without an
//! instrument attached. All delays use `tokio::time::sleep`, so tests with a
//! paused clock run instantly.
//!
//! # Simulation
//!
//! - Cumulative photon-count frames with a per-position specimen
//! - A PMT overload latch that stops all counts once tripped
//! - Latch clearing only while the high voltage is off
//! - Per-tile instrument files (`<label>_0000.{spc,sdt,json}`) when file saving is on
//! - Deterministic or random overload trips, and command failure injection
//!
//! ```rust,ignore
//! use tilescan_driver_mock::MockScanEngine;
//!
//! let engine = MockScanEngine::builder()
//!     .pixels(256)
//!     .seed(7)
//!     .overload_at(3, 1)
//!     .build();
//! ```

pub mod common;
mod mock_scan_engine;
mod pattern;

pub use common::{ErrorConfig, ErrorScenario, MockMode, MockRng, ScanTiming};
pub use mock_scan_engine::{
    HardwareCall, MockScanEngine, MockScanEngineBuilder, MockScanEngineConfig, OverloadTrigger,
};
pub use pattern::specimen_brightness;
