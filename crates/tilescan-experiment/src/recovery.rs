//! PMT overload recovery.
//!
//! A tripped PMT is brought back with a fixed sequence:
//!
//! ```text
//! Armed ─▶ PoweringDown ─▶ Clearing ─(clear settle)─▶ PoweringUp ─(power settle)─▶ Settling ─▶ Armed
//! ```
//!
//! The event that tripped the detector is not re-acquired. Recovery only
//! prepares the hardware for the next event. Any failed command aborts the
//! run, since a detector that cannot be reset produces nothing useful.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tilescan_core::capabilities::DetectorControl;
use tilescan_core::{RecoveryState, ScanResult, TileScanError};
use tokio::time::sleep;
use tracing::debug;

/// Settle delays of the recovery sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryTiming {
    /// Wait after clearing the overload latch, in milliseconds.
    pub clear_settle_ms: u64,
    /// Wait after powering the detector back up, in milliseconds.
    pub power_settle_ms: u64,
}

impl Default for RecoveryTiming {
    fn default() -> Self {
        Self {
            clear_settle_ms: 100,
            power_settle_ms: 5_000,
        }
    }
}

impl RecoveryTiming {
    /// Delay after the clear command.
    pub fn clear_settle(&self) -> Duration {
        Duration::from_millis(self.clear_settle_ms)
    }

    /// Delay after power-up.
    pub fn power_settle(&self) -> Duration {
        Duration::from_millis(self.power_settle_ms)
    }
}

/// States visited by one completed recovery, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Every state entered, ending with [`RecoveryState::Armed`].
    pub transitions: Vec<RecoveryState>,
}

/// Power-cycle state machine for a tripped detector.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryProtocol {
    timing: RecoveryTiming,
}

impl RecoveryProtocol {
    /// Protocol with the given settle delays.
    pub fn new(timing: RecoveryTiming) -> Self {
        Self { timing }
    }

    /// Settle delays in use.
    pub fn timing(&self) -> RecoveryTiming {
        self.timing
    }

    /// Run the full sequence against `detector`.
    ///
    /// # Errors
    ///
    /// [`TileScanError::RecoveryFailed`] naming the state whose command failed.
    pub async fn run<D>(&self, detector: &D) -> ScanResult<RecoveryReport>
    where
        D: DetectorControl + ?Sized,
    {
        let mut transitions = Vec::with_capacity(5);

        let mut enter = |state: RecoveryState| {
            debug!(state = %state, "Detector recovery");
            transitions.push(state);
            state
        };

        let state = enter(RecoveryState::PoweringDown);
        detector
            .set_detector_power(false)
            .await
            .map_err(|source| TileScanError::RecoveryFailed { state, source })?;

        let state = enter(RecoveryState::Clearing);
        detector
            .clear_detector_overload()
            .await
            .map_err(|source| TileScanError::RecoveryFailed { state, source })?;
        sleep(self.timing.clear_settle()).await;

        let state = enter(RecoveryState::PoweringUp);
        detector
            .set_detector_power(true)
            .await
            .map_err(|source| TileScanError::RecoveryFailed { state, source })?;

        enter(RecoveryState::Settling);
        sleep(self.timing.power_settle()).await;

        enter(RecoveryState::Armed);
        Ok(RecoveryReport { transitions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilescan_driver_mock::{ErrorConfig, ErrorScenario, HardwareCall, MockScanEngine};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_sequence_and_settle_delays() {
        let engine = MockScanEngine::builder().pixels(4).build();
        engine.set_detector_power(true).await.unwrap();
        engine.trip_overload();

        let start = Instant::now();
        let report = RecoveryProtocol::default().run(&engine).await.unwrap();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(5_100));
        assert!(elapsed < Duration::from_millis(5_110));
        assert_eq!(
            report.transitions,
            vec![
                RecoveryState::PoweringDown,
                RecoveryState::Clearing,
                RecoveryState::PoweringUp,
                RecoveryState::Settling,
                RecoveryState::Armed,
            ]
        );
        assert_eq!(
            engine.calls()[1..],
            [
                HardwareCall::DetectorPower(false),
                HardwareCall::ClearOverload,
                HardwareCall::DetectorPower(true),
            ]
        );
        assert!(engine.detector_powered());
        assert!(!engine.overload_latched());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_clear_is_fatal_and_names_state() {
        let engine = MockScanEngine::builder()
            .pixels(4)
            .error_config(ErrorConfig::scenario(ErrorScenario::Timeout {
                operation: "clear_detector_overload",
            }))
            .build();

        let err = RecoveryProtocol::default().run(&engine).await.unwrap_err();
        match err {
            TileScanError::RecoveryFailed { state, .. } => {
                assert_eq!(state, RecoveryState::Clearing)
            }
            other => panic!("unexpected error: {other}"),
        }
        // Power-up is never attempted after a failed clear.
        assert_eq!(
            engine.calls(),
            vec![
                HardwareCall::DetectorPower(false),
                HardwareCall::ClearOverload
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_power_up() {
        let engine = MockScanEngine::builder()
            .pixels(4)
            .error_config(ErrorConfig::scenario(ErrorScenario::FailOnCall {
                operation: "set_detector_power",
                call: 2,
            }))
            .build();

        let err = RecoveryProtocol::default().run(&engine).await.unwrap_err();
        assert!(matches!(
            err,
            TileScanError::RecoveryFailed {
                state: RecoveryState::PoweringUp,
                ..
            }
        ));
    }

    #[test]
    fn test_default_timing() {
        let timing = RecoveryTiming::default();
        assert_eq!(timing.clear_settle(), Duration::from_millis(100));
        assert_eq!(timing.power_settle(), Duration::from_secs(5));
    }
}
