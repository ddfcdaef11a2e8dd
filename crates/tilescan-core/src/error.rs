//! Error types for tiled acquisition.
//!
//! `TileScanError` is the single typed error for the acquisition loop and its
//! startup path. Variants fall into three classes:
//!
//! - **Startup errors** (`Configuration`, `InputFormat`, `PreexistingOutput`)
//!   surface before any event runs and make the invoker exit non-zero.
//! - **Mid-run fatal errors** (`EmptyFrameSet`, `ShapeMismatch`, `Hardware`,
//!   `RecoveryFailed`, `PreexistingManifest`, `Io`) abort the remaining
//!   sequence after a best-effort hardware shutdown. Tiles already captured
//!   and their manifest entries stay valid.
//! - **Warnings** (`Persistence`) are reported and swallowed.
//!
//! Hardware capability traits use `anyhow::Result`; the acquisition loop wraps
//! those failures into `Hardware` or `RecoveryFailed` so callers can tell which
//! hardware operation failed.

use crate::data::RecoveryState;
use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// Category of a structured driver error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Device failed to come up
    Initialization,
    /// Device rejected a configuration value
    Configuration,
    /// Link to the device failed
    Communication,
    /// Device reported a fault
    Hardware,
    /// Device did not answer in time
    Timeout,
    /// Anything else
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Structured error raised by a hardware driver.
#[derive(Error, Debug, Clone)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Driver identifier (e.g. `mock_scan_engine`)
    pub driver_type: String,
    /// Error category
    pub kind: DriverErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl DriverError {
    /// Create a new driver error.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results using the acquisition error type.
pub type ScanResult<T> = std::result::Result<T, TileScanError>;

/// Primary error type for tiled acquisition.
#[derive(Error, Debug)]
pub enum TileScanError {
    /// Required environment or configuration is missing or invalid.
    ///
    /// **Error Type**: Permanent - fatal at startup, before any event runs.
    ///
    /// **Recovery Strategy**: Set the missing variable or fix the config file and restart.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A position list row is malformed.
    ///
    /// Rows must hold exactly three numeric fields (X, Y, Z). The offending
    /// row content is carried so the operator can find it.
    ///
    /// **Error Type**: Permanent - fatal before the run starts.
    #[error("Position rows must contain X, Y, Z; row {row}: {reason}; found: {content}")]
    InputFormat {
        /// 1-based row number in the source file
        row: usize,
        /// Raw row content, fields joined with `,`
        content: String,
        /// What was wrong with the row
        reason: String,
    },

    /// The save directory already exists.
    ///
    /// **Error Type**: Permanent - fatal before the run starts.
    ///
    /// **Recovery Strategy**: Choose a fresh save directory. Runs never write
    /// into a directory holding earlier data.
    #[error("The save directory {} already exists", path.display())]
    PreexistingOutput {
        /// Offending directory
        path: PathBuf,
    },

    /// A tile manifest already exists at the start of a run.
    ///
    /// Raised when the first tile of a run finds `tile_config.txt` in place,
    /// instead of appending to another run's metadata.
    #[error("Tile config file already exists: {}", path.display())]
    PreexistingManifest {
        /// Manifest path
        path: PathBuf,
    },

    /// An event produced no frames.
    ///
    /// **Error Type**: Permanent - the hardware broke its contract.
    #[error("Event produced an empty frame set")]
    EmptyFrameSet,

    /// Frames within one event have different shapes.
    ///
    /// **Error Type**: Permanent - the hardware broke its contract.
    #[error("Frame {index} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        /// Index of the first mismatching frame
        index: usize,
        /// Shape of frame 0 as `(height, width)`
        expected: (usize, usize),
        /// Shape of the mismatching frame
        found: (usize, usize),
    },

    /// A hardware command outside the recovery protocol failed.
    #[error("Hardware operation '{operation}' failed: {source}")]
    Hardware {
        /// Operation that failed (e.g. `execute_event`)
        operation: &'static str,
        /// Underlying driver error
        #[source]
        source: anyhow::Error,
    },

    /// A hardware command inside the detector recovery protocol failed.
    ///
    /// **Error Type**: Permanent - a detector that cannot be reset makes
    /// continued acquisition meaningless, so the run is aborted.
    #[error("Detector recovery failed while {state}: {source}")]
    RecoveryFailed {
        /// Protocol state in which the command failed
        state: RecoveryState,
        /// Underlying driver error
        #[source]
        source: anyhow::Error,
    },

    /// A non-essential file write failed.
    ///
    /// **Error Type**: Warning - logged, the run continues. Instrument-native
    /// per-tile files remain as a fallback.
    #[error("Failed to persist {}: {source}", path.display())]
    Persistence {
        /// Target file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: anyhow::Error,
    },

    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was cancelled at an event boundary.
    #[error("Run aborted: {0}")]
    Aborted(String),
}

impl TileScanError {
    /// Whether this error must stop the run.
    ///
    /// Only persistence warnings are non-fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TileScanError::Persistence { .. })
    }

    /// Whether this error is raised before any event runs.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            TileScanError::Configuration(_)
                | TileScanError::InputFormat { .. }
                | TileScanError::PreexistingOutput { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_format_display_names_row() {
        let err = TileScanError::InputFormat {
            row: 3,
            content: "1.0,2.0".into(),
            reason: "expected 3 fields, found 2".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("row 3"));
        assert!(msg.contains("found: 1.0,2.0"));
    }

    #[test]
    fn test_recovery_failed_display() {
        let err = TileScanError::RecoveryFailed {
            state: RecoveryState::Clearing,
            source: anyhow::anyhow!("DCC not responding"),
        };
        assert_eq!(
            err.to_string(),
            "Detector recovery failed while clearing: DCC not responding"
        );
    }

    #[test]
    fn test_fatality_classification() {
        let warning = TileScanError::Persistence {
            path: PathBuf::from("pos_0000.tif"),
            source: anyhow::anyhow!("disk full"),
        };
        assert!(!warning.is_fatal());
        assert!(TileScanError::EmptyFrameSet.is_fatal());
        assert!(TileScanError::Configuration("x".into()).is_startup());
        assert!(!TileScanError::EmptyFrameSet.is_startup());
    }

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::new(
            "mock_scan_engine",
            DriverErrorKind::Communication,
            "link down",
        );
        assert!(err
            .to_string()
            .contains("Driver 'mock_scan_engine' communication error"));
    }
}
