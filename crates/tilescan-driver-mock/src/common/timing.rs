//! Hardware-like delays used in [`MockMode::Realistic`](super::MockMode).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Simulated latencies of a laser-scanning FLIM rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanTiming {
    /// XY stage travel and settle per event, in milliseconds.
    pub stage_move_ms: u64,
    /// One full raster scan, in milliseconds.
    pub frame_scan_ms: u64,
    /// Round trip of a single device command, in milliseconds.
    pub command_latency_ms: u64,
}

impl Default for ScanTiming {
    fn default() -> Self {
        Self::galvo_256()
    }
}

impl ScanTiming {
    /// Galvo scanning at 256x256 with a motorised stage.
    pub fn galvo_256() -> Self {
        Self {
            stage_move_ms: 150,
            frame_scan_ms: 250,
            command_latency_ms: 5,
        }
    }

    /// All delays zero.
    pub fn zero() -> Self {
        Self {
            stage_move_ms: 0,
            frame_scan_ms: 0,
            command_latency_ms: 0,
        }
    }

    /// Stage move delay.
    pub fn stage_move(&self) -> Duration {
        Duration::from_millis(self.stage_move_ms)
    }

    /// Per-frame scan delay.
    pub fn frame_scan(&self) -> Duration {
        Duration::from_millis(self.frame_scan_ms)
    }

    /// Device command delay.
    pub fn command_latency(&self) -> Duration {
        Duration::from_millis(self.command_latency_ms)
    }
}
