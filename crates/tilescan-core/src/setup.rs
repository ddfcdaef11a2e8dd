//! One-shot device configuration applied at startup.
//!
//! These settings are written once before the first event and never touched
//! by the acquisition loop. There is no retry: a failed setup is a startup
//! failure.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Laser-scanning resolution (pixels per side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ScanResolution {
    /// 256 × 256
    #[default]
    Px256,
    /// 512 × 512
    Px512,
    /// 1024 × 1024
    Px1024,
}

impl ScanResolution {
    /// Pixels per side.
    pub fn pixels(self) -> u32 {
        match self {
            ScanResolution::Px256 => 256,
            ScanResolution::Px512 => 512,
            ScanResolution::Px1024 => 1024,
        }
    }
}

impl TryFrom<u32> for ScanResolution {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            256 => Ok(ScanResolution::Px256),
            512 => Ok(ScanResolution::Px512),
            1024 => Ok(ScanResolution::Px1024),
            other => Err(format!(
                "unsupported scan resolution {} (expected 256, 512 or 1024)",
                other
            )),
        }
    }
}

impl From<ScanResolution> for u32 {
    fn from(value: ScanResolution) -> Self {
        value.pixels()
    }
}

impl fmt::Display for ScanResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pixels())
    }
}

/// Static detector and scanner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSetup {
    /// Detector channel preset
    pub channel: String,
    /// Emission filter wheel position
    pub filter: String,
    /// Objective lens preset
    pub lens: String,
    /// Scan resolution
    pub resolution: ScanResolution,
    /// Pockels cell control voltage (V)
    pub eom_voltage: f64,
    /// PMT high-voltage gain (percent of full scale)
    pub pmt_gain_percent: f64,
    /// Whether the TCSPC module checks for the laser SYNC signal
    pub sync_check: bool,
    /// Whether the TCSPC module writes per-tile instrument files
    pub flim_file_saving: bool,
}

impl Default for DeviceSetup {
    fn default() -> Self {
        Self {
            channel: "PhotonCounting Only".to_string(),
            filter: "457-50".to_string(),
            lens: "20X 0.75 Nikon".to_string(),
            resolution: ScanResolution::Px256,
            eom_voltage: 0.0,
            pmt_gain_percent: 70.0,
            sync_check: true,
            flim_file_saving: false,
        }
    }
}

impl DeviceSetup {
    /// Check value ranges.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.pmt_gain_percent) {
            return Err(format!(
                "pmt_gain_percent must be within 0..=100, got {}",
                self.pmt_gain_percent
            ));
        }
        if !self.eom_voltage.is_finite() {
            return Err("eom_voltage must be finite".to_string());
        }
        Ok(())
    }
}
