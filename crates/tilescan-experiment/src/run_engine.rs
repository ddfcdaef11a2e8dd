//! RunEngine - drives a tiled acquisition from start to shutdown.
//!
//! The engine owns the run lifecycle around the per-event handler:
//!
//! ```text
//! ┌──────┐   run()   ┌─────────┐  abort()  ┌──────────┐
//! │ Idle │──────────▶│ Running │──────────▶│ Aborting │
//! └──────┘           └────┬────┘           └────┬─────┘
//!    ▲                    │ finished / failed    │ next event boundary
//!    └────────────────────┴──────────────────────┘
//! ```
//!
//! A run powers the PMT on, waits for it to warm up, executes every event in
//! order, and always finishes with a best-effort shutdown (PMT off, shutter
//! closed) whether the run completed, failed, or was aborted. Aborts are only
//! honoured between events, so a tile is never left half-renamed.
//!
//! An abort request is sticky. One that arrives before `run()` has started
//! stops the run before the detector is powered, and it is never cleared, so
//! an engine is good for at most one aborted run.
//!
//! # Usage
//!
//! ```rust,ignore
//! let engine = Arc::new(RunEngine::new(hardware, Some(save_dir), RunOptions::default())
//!     .with_sink(Arc::new(TiffStackWriter::new())));
//!
//! let mut events = engine.subscribe();
//! let runner = tokio::spawn({
//!     let engine = engine.clone();
//!     async move { engine.run(&sequence).await }
//! });
//!
//! while let Ok(event) = events.recv().await {
//!     if let RunEvent::RunFinished { .. } = event {
//!         break;
//!     }
//! }
//! ```

use crate::handler::{AcquisitionEventHandler, TileOutcome};
use crate::recovery::{RecoveryProtocol, RecoveryTiming};
use crate::sequence::TileSequence;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tilescan_core::capabilities::FrameStackSink;
use tilescan_core::{HardwareEngine, ScanResult, TileScanError};
use tokio::sync::{broadcast, RwLock};
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No run in progress
    Idle,
    /// Executing events
    Running,
    /// Abort requested, stopping at the next event boundary
    Aborting,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Running => write!(f, "running"),
            EngineState::Aborting => write!(f, "aborting"),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every event was executed
    Completed,
    /// Cancelled at an event boundary
    Aborted,
    /// Stopped by a fatal error
    Failed,
}

/// Progress notifications broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// The detector is warm and the first event is about to run
    RunStarted {
        /// Events scheduled
        total_events: usize,
    },
    /// One event finished and its tile is on disk
    TileAcquired {
        /// Tile basename
        tile: String,
        /// Stage X
        x: f64,
        /// Stage Y
        y: f64,
        /// Frames acquired
        frames: usize,
    },
    /// The PMT was power-cycled after a tile
    RecoveryPerformed {
        /// Tile that tripped the detector
        tile: String,
        /// Position index of that tile
        position: usize,
    },
    /// The combined image of a tile could not be written
    PersistenceWarning {
        /// Affected tile
        tile: String,
        /// Failure description
        message: String,
    },
    /// The run is over and the hardware has been shut down
    RunFinished {
        /// Final status
        status: RunStatus,
        /// Tiles completed
        tiles: u32,
    },
}

/// Run-level timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Wait after powering the PMT on before the first event, in milliseconds.
    pub warmup_ms: u64,
    /// Recovery settle delays.
    pub recovery: RecoveryTiming,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            warmup_ms: 5_000,
            recovery: RecoveryTiming::default(),
        }
    }
}

impl RunOptions {
    /// Warm-up delay.
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }
}

/// Totals of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    /// Tiles completed
    pub tiles: u32,
    /// PMT recoveries performed
    pub recoveries: u32,
    /// Combined images that failed to write
    pub persistence_warnings: u32,
}

/// Drives a [`TileSequence`] through an [`AcquisitionEventHandler`].
pub struct RunEngine {
    /// Current engine state
    state: RwLock<EngineState>,

    /// Hardware shared with the handler
    hardware: Arc<dyn HardwareEngine>,

    /// Combined-image writer, used only when saving
    sink: Option<Arc<dyn FrameStackSink>>,

    /// Run output directory
    save_dir: Option<PathBuf>,

    options: RunOptions,

    /// Progress broadcast channel
    event_sender: broadcast::Sender<RunEvent>,

    /// Abort reason, set by [`abort`](Self::abort)
    abort_requested: RwLock<Option<String>>,
}

impl RunEngine {
    /// Create an engine for `hardware`, saving into `save_dir` if given.
    pub fn new(
        hardware: Arc<dyn HardwareEngine>,
        save_dir: Option<PathBuf>,
        options: RunOptions,
    ) -> Self {
        let (event_sender, _) = broadcast::channel(1024);

        Self {
            state: RwLock::new(EngineState::Idle),
            hardware,
            sink: None,
            save_dir,
            options,
            event_sender,
            abort_requested: RwLock::new(None),
        }
    }

    /// Also write each tile's frame stack through `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn FrameStackSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Subscribe to progress events
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.event_sender.subscribe()
    }

    /// Get current engine state
    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    /// Request the run to stop at the next event boundary.
    ///
    /// Accepted in any state. The first reason wins.
    pub async fn abort(&self, reason: &str) {
        let mut state = self.state.write().await;
        {
            let mut requested = self.abort_requested.write().await;
            if requested.is_none() {
                *requested = Some(reason.to_string());
            }
        }
        let current = *state;
        info!(reason = %reason, state = %current, "Abort requested");
        if current == EngineState::Running {
            *state = EngineState::Aborting;
        }
    }

    /// Whether an abort has been requested.
    pub async fn abort_requested(&self) -> bool {
        self.abort_requested.read().await.is_some()
    }

    async fn check_abort(&self) -> ScanResult<()> {
        match self.abort_requested.read().await.clone() {
            Some(reason) => Err(TileScanError::Aborted(reason)),
            None => Ok(()),
        }
    }

    /// Execute every event of `sequence`, then shut the hardware down.
    ///
    /// The shutdown runs on every exit path and never masks the run's own
    /// result.
    ///
    /// # Errors
    ///
    /// - [`TileScanError::Aborted`] if [`abort`](Self::abort) was called
    /// - any fatal error from the event handler or the start-up power-on
    pub async fn run(&self, sequence: &TileSequence) -> ScanResult<RunSummary> {
        {
            let mut state = self.state.write().await;
            if *state != EngineState::Idle {
                return Err(TileScanError::Configuration(format!(
                    "Cannot start: engine is {}",
                    *state
                )));
            }
            *state = EngineState::Running;
        }

        let mut summary = RunSummary::default();
        let result = self.execute(sequence, &mut summary).await;

        self.shutdown().await;

        let status = match &result {
            Ok(()) => RunStatus::Completed,
            Err(TileScanError::Aborted(_)) => RunStatus::Aborted,
            Err(_) => RunStatus::Failed,
        };
        match &result {
            Ok(()) => info!(tiles = summary.tiles, recoveries = summary.recoveries, "Run completed"),
            Err(TileScanError::Aborted(reason)) => {
                warn!(tiles = summary.tiles, reason = %reason, "Run aborted")
            }
            Err(e) => error!(tiles = summary.tiles, error = %e, "Run failed"),
        }

        *self.state.write().await = EngineState::Idle;
        self.emit(RunEvent::RunFinished {
            status,
            tiles: summary.tiles,
        });

        result.map(|()| summary)
    }

    async fn execute(&self, sequence: &TileSequence, summary: &mut RunSummary) -> ScanResult<()> {
        self.check_abort().await?;
        self.hardware
            .set_detector_power(true)
            .await
            .map_err(|source| TileScanError::Hardware {
                operation: "set_detector_power",
                source,
            })?;
        info!(warmup = ?self.options.warmup(), "PMT powered on, waiting for warm-up");
        sleep(self.options.warmup()).await;

        let total = sequence.len();
        self.emit(RunEvent::RunStarted {
            total_events: total,
        });

        let mut handler = AcquisitionEventHandler::new(
            Arc::clone(&self.hardware),
            self.save_dir.clone(),
            RecoveryProtocol::new(self.options.recovery),
        );

        for event in sequence.events() {
            self.check_abort().await?;

            let outcome = handler.handle_event(&event).await?;
            info!(
                tile = %outcome.tile,
                x = event.position.x,
                y = event.position.y,
                "Acquired tile {}/{}",
                event.sequence + 1,
                total
            );
            self.complete_tile(outcome, summary).await;
        }

        Ok(())
    }

    async fn complete_tile(&self, outcome: TileOutcome, summary: &mut RunSummary) {
        let TileOutcome {
            tile,
            event,
            frames,
            recovery,
            ..
        } = outcome;
        summary.tiles += 1;

        if recovery.is_some() {
            summary.recoveries += 1;
            self.emit(RunEvent::RecoveryPerformed {
                tile: tile.basename().to_string(),
                position: event.index.position,
            });
        }

        let frame_count = frames.len();
        if let (Some(sink), Some(_)) = (&self.sink, &self.save_dir) {
            // TIFF encoding and file I/O stay off the runtime threads.
            let sink = Arc::clone(sink);
            let prefix = tile.prefix().to_path_buf();
            let persisted = tokio::task::spawn_blocking(move || sink.persist(&prefix, &frames))
                .await
                .unwrap_or_else(|e| Err(anyhow::anyhow!("persistence task failed: {e}")));

            if let Err(source) = persisted {
                let warning = TileScanError::Persistence {
                    path: tile.prefix().to_path_buf(),
                    source,
                };
                warn!(tile = %tile, error = %warning, "Combined image not written");
                summary.persistence_warnings += 1;
                self.emit(RunEvent::PersistenceWarning {
                    tile: tile.basename().to_string(),
                    message: warning.to_string(),
                });
            }
        }

        self.emit(RunEvent::TileAcquired {
            tile: tile.basename().to_string(),
            x: event.position.x,
            y: event.position.y,
            frames: frame_count,
        });
    }

    /// PMT off, shutter closed. Failures are logged, never returned.
    async fn shutdown(&self) {
        info!("Shutting down");
        if let Err(e) = self.hardware.set_detector_power(false).await {
            warn!(error = %e, "Failed to power off PMT during shutdown");
        }
        if let Err(e) = self.hardware.close_shutter().await {
            warn!(error = %e, "Failed to close shutter during shutdown");
        }
    }

    fn emit(&self, event: RunEvent) {
        // No subscribers is fine.
        let _ = self.event_sender.send(event);
    }
}
