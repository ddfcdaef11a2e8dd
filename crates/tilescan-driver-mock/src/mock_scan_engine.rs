//! Simulated laser-scanning FLIM engine with a PMT that can trip.
//!
//! The engine produces cumulative photon-count frames: frame `k` of an event
//! contains all counts of frames `0..=k`. While the detector is powered and
//! not latched in overload, every pixel gains at least one count per frame.
//! Once the overload latch trips, counts stop and later frames repeat the
//! previous one, which is exactly what a shut-off PMT looks like downstream.
//!
//! The latch only clears when [`DetectorControl::clear_detector_overload`] is
//! called while the high voltage is off, so the only way back to a live
//! detector is power down, clear, power up.

use crate::common::{ErrorConfig, MockMode, MockRng, ScanTiming};
use crate::pattern::specimen_brightness;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tilescan_core::capabilities::{
    Configurable, DetectorControl, EventExecutor, FrameStream, OutputLabeling, ShutterControl,
};
use tilescan_core::{
    AcquisitionEvent, DeviceSetup, Frame, Image, INSTRUMENT_FILE_EXTENSIONS, PENDING_FILE_SUFFIX,
};
use tokio::time::sleep;

const DRIVER_TYPE: &str = "mock_scan_engine";

// =============================================================================
// Configuration
// =============================================================================

/// Trip the overload latch just before frame `frame` of event `event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverloadTrigger {
    /// Event sequence number (0-based, in schedule order).
    pub event: usize,
    /// Frame index within the event (0-based).
    pub frame: u32,
}

/// Configuration for [`MockScanEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockScanEngineConfig {
    /// Frame edge length in pixels until a [`DeviceSetup`] sets the resolution.
    pub pixels: u32,
    /// Seed for photon counts and random overloads. `None` seeds from the OS.
    pub seed: Option<u64>,
    /// Pacing mode.
    pub mode: MockMode,
    /// Delays used in realistic mode.
    pub timing: ScanTiming,
    /// Deterministic overload trips.
    pub overload_at: Vec<OverloadTrigger>,
    /// Per-frame probability of a spontaneous overload trip.
    pub overload_rate: f64,
}

impl Default for MockScanEngineConfig {
    fn default() -> Self {
        Self {
            pixels: 256,
            seed: None,
            mode: MockMode::Instant,
            timing: ScanTiming::default(),
            overload_at: Vec::new(),
            overload_rate: 0.0,
        }
    }
}

impl MockScanEngineConfig {
    /// Reject settings the simulation cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.pixels == 0 {
            anyhow::bail!("Scan resolution must be non-zero");
        }
        if !(0.0..=1.0).contains(&self.overload_rate) {
            anyhow::bail!(
                "Overload rate must be within 0..=1, got {}",
                self.overload_rate
            );
        }
        Ok(())
    }
}

/// One command received by the engine, in arrival order.
///
/// Calls are recorded before failure injection, so a rejected call still
/// appears here.
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareCall {
    /// [`Configurable::apply_setup`].
    ApplySetup,
    /// [`OutputLabeling::set_output_label`].
    SetOutputLabel(PathBuf),
    /// [`EventExecutor::execute_event`].
    ExecuteEvent {
        /// Event sequence number.
        sequence: usize,
        /// Requested frames.
        frames: u32,
    },
    /// [`DetectorControl::set_detector_power`].
    DetectorPower(bool),
    /// [`DetectorControl::clear_detector_overload`].
    ClearOverload,
    /// [`ShutterControl::open_shutter`].
    OpenShutter,
    /// [`ShutterControl::close_shutter`].
    CloseShutter,
}

// =============================================================================
// MockScanEngineBuilder
// =============================================================================

/// Builder for [`MockScanEngine`].
pub struct MockScanEngineBuilder {
    config: MockScanEngineConfig,
    error_config: ErrorConfig,
}

impl MockScanEngineBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self {
            config: MockScanEngineConfig::default(),
            error_config: ErrorConfig::none(),
        }
    }

    /// Start from a deserialized configuration.
    pub fn from_config(config: MockScanEngineConfig) -> Self {
        Self {
            config,
            error_config: ErrorConfig::none(),
        }
    }

    /// Frame edge length before any setup is applied.
    pub fn pixels(mut self, pixels: u32) -> Self {
        self.config.pixels = pixels;
        self
    }

    /// Fixed seed for reproducible frames.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Pacing mode.
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Realistic-mode delays.
    pub fn timing(mut self, timing: ScanTiming) -> Self {
        self.config.timing = timing;
        self
    }

    /// Trip the detector before `frame` of event `event`.
    pub fn overload_at(mut self, event: usize, frame: u32) -> Self {
        self.config.overload_at.push(OverloadTrigger { event, frame });
        self
    }

    /// Per-frame probability of a spontaneous trip.
    pub fn overload_rate(mut self, rate: f64) -> Self {
        self.config.overload_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Failure injection for engine commands.
    pub fn error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    /// Build the engine.
    pub fn build(self) -> MockScanEngine {
        MockScanEngine::from_builder(self)
    }
}

impl Default for MockScanEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// MockScanEngine
// =============================================================================

#[derive(Debug)]
struct Instrument {
    pixels: u32,
    detector_powered: bool,
    overload_latched: bool,
    shutter_open: bool,
    label: Option<PathBuf>,
    setup: Option<DeviceSetup>,
    events_executed: usize,
    calls: Vec<HardwareCall>,
}

#[derive(Debug)]
struct Simulation {
    rng: MockRng,
    triggers: Vec<OverloadTrigger>,
    overload_rate: f64,
    instrument: Mutex<Instrument>,
}

impl Simulation {
    /// Latch the overload if a trigger fires before this frame.
    ///
    /// Returns true if the detector is live for the frame.
    fn advance(&self, sequence: usize, frame: u32) -> bool {
        let scheduled = self
            .triggers
            .iter()
            .any(|t| t.event == sequence && t.frame == frame);
        let spontaneous = self.rng.chance(self.overload_rate);

        let mut instrument = self.instrument.lock();
        if (scheduled || spontaneous) && instrument.detector_powered && !instrument.overload_latched
        {
            tracing::warn!(sequence, frame, "MockScanEngine: PMT overload tripped");
            instrument.overload_latched = true;
        }
        instrument.detector_powered && !instrument.overload_latched
    }
}

/// Simulated scanning FLIM hardware.
///
/// Implements every capability of [`tilescan_core::HardwareEngine`].
///
/// # Example
///
/// ```rust,ignore
/// let engine = MockScanEngine::builder().pixels(64).seed(1).overload_at(2, 1).build();
/// engine.set_detector_power(true).await?;
/// let frames = FrameBuffer::drain(engine.execute_event(&event).await?).await?;
/// ```
pub struct MockScanEngine {
    mode: MockMode,
    timing: ScanTiming,
    error_config: ErrorConfig,
    sim: Arc<Simulation>,
}

impl MockScanEngine {
    /// Engine with default configuration.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Builder for advanced configuration.
    pub fn builder() -> MockScanEngineBuilder {
        MockScanEngineBuilder::new()
    }

    /// Engine from a deserialized configuration.
    pub fn with_config(config: MockScanEngineConfig) -> Self {
        MockScanEngineBuilder::from_config(config).build()
    }

    fn from_builder(builder: MockScanEngineBuilder) -> Self {
        let MockScanEngineBuilder {
            config,
            error_config,
        } = builder;

        Self {
            mode: config.mode,
            timing: config.timing,
            error_config,
            sim: Arc::new(Simulation {
                rng: MockRng::new(config.seed),
                triggers: config.overload_at,
                overload_rate: config.overload_rate,
                instrument: Mutex::new(Instrument {
                    pixels: config.pixels,
                    detector_powered: false,
                    overload_latched: false,
                    shutter_open: false,
                    label: None,
                    setup: None,
                    events_executed: 0,
                    calls: Vec::new(),
                }),
            }),
        }
    }

    /// Every command received so far, in order.
    pub fn calls(&self) -> Vec<HardwareCall> {
        self.sim.instrument.lock().calls.clone()
    }

    /// Whether the PMT high voltage is on.
    pub fn detector_powered(&self) -> bool {
        self.sim.instrument.lock().detector_powered
    }

    /// Whether the PMT overload latch is set.
    pub fn overload_latched(&self) -> bool {
        self.sim.instrument.lock().overload_latched
    }

    /// Whether the excitation shutter is open.
    pub fn shutter_open(&self) -> bool {
        self.sim.instrument.lock().shutter_open
    }

    /// The last applied device setup.
    pub fn applied_setup(&self) -> Option<DeviceSetup> {
        self.sim.instrument.lock().setup.clone()
    }

    /// The current output label.
    pub fn output_label(&self) -> Option<PathBuf> {
        self.sim.instrument.lock().label.clone()
    }

    /// Number of events whose frame stream was handed out.
    pub fn events_executed(&self) -> usize {
        self.sim.instrument.lock().events_executed
    }

    /// Force the overload latch, as if the PMT had just tripped.
    pub fn trip_overload(&self) {
        self.sim.instrument.lock().overload_latched = true;
    }

    fn record(&self, call: HardwareCall) {
        self.sim.instrument.lock().calls.push(call);
    }

    async fn command(&self, call: HardwareCall, operation: &'static str) -> Result<()> {
        self.record(call);
        self.error_config.check_operation(DRIVER_TYPE, operation)?;
        if self.mode.is_paced() {
            sleep(self.timing.command_latency()).await;
        }
        Ok(())
    }
}

impl Default for MockScanEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-event stream state.
struct Scan {
    sim: Arc<Simulation>,
    event: AcquisitionEvent,
    brightness: Vec<u16>,
    accumulated: Image,
    increment: Vec<u16>,
    next_frame: u32,
    frame_delay: Option<std::time::Duration>,
    instrument_files: Option<PathBuf>,
}

impl Scan {
    fn acquire(&mut self) -> Result<Frame> {
        let k = self.next_frame;
        self.next_frame += 1;

        if self.sim.advance(self.event.sequence, k) {
            self.sim.rng.fill_counts(&self.brightness, &mut self.increment);
            for (total, &counts) in self.accumulated.iter_mut().zip(&self.increment) {
                *total = total.saturating_add(counts);
            }
        }

        if self.next_frame == self.event.frame_count {
            if let Some(label) = &self.instrument_files {
                write_instrument_files(label, &self.event, &self.accumulated)?;
            }
        }

        Ok(Frame::new(self.accumulated.clone(), &self.event))
    }
}

/// Write `<label>_0000.{spc,sdt,json}` the way the acquisition software does.
fn write_instrument_files(label: &Path, event: &AcquisitionEvent, image: &Image) -> Result<()> {
    let stem = format!("{}{PENDING_FILE_SUFFIX}", label.display());
    let (height, width) = image.dim();
    let raw: Vec<u8> = image.iter().flat_map(|v| v.to_le_bytes()).collect();

    for ext in INSTRUMENT_FILE_EXTENSIONS {
        let contents = match ext {
            "sdt" => {
                let mut sdt = Vec::with_capacity(raw.len() + 8);
                sdt.extend_from_slice(&(width as u32).to_le_bytes());
                sdt.extend_from_slice(&(height as u32).to_le_bytes());
                sdt.extend_from_slice(&raw);
                sdt
            }
            "json" => serde_json::to_vec_pretty(&serde_json::json!({
                "position": event.position,
                "index": { "p": event.index.position, "t": event.index.time },
                "frames": event.frame_count,
                "width": width,
                "height": height,
            }))?,
            _ => raw.clone(),
        };
        let path = PathBuf::from(format!("{stem}.{ext}"));
        std::fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
    }

    tracing::debug!(label = %label.display(), "MockScanEngine: instrument files written");
    Ok(())
}

#[async_trait]
impl EventExecutor for MockScanEngine {
    async fn execute_event(&self, event: &AcquisitionEvent) -> Result<FrameStream> {
        self.record(HardwareCall::ExecuteEvent {
            sequence: event.sequence,
            frames: event.frame_count,
        });
        self.error_config
            .check_operation(DRIVER_TYPE, "execute_event")?;

        if self.mode.is_paced() {
            sleep(self.timing.stage_move()).await;
        }

        let (pixels, instrument_files) = {
            let mut instrument = self.sim.instrument.lock();
            instrument.events_executed += 1;
            let saving = instrument
                .setup
                .as_ref()
                .is_some_and(|setup| setup.flim_file_saving);
            let files = if saving { instrument.label.clone() } else { None };
            (instrument.pixels as usize, files)
        };

        tracing::debug!(
            sequence = event.sequence,
            index = %event.index,
            position = %event.position,
            frames = event.frame_count,
            "MockScanEngine: executing event"
        );

        let scan = Scan {
            sim: Arc::clone(&self.sim),
            event: event.clone(),
            brightness: specimen_brightness(pixels as u32, pixels as u32, &event.position),
            accumulated: Image::zeros((pixels, pixels)),
            increment: vec![0; pixels * pixels],
            next_frame: 0,
            frame_delay: self.mode.is_paced().then(|| self.timing.frame_scan()),
            instrument_files,
        };

        let stream = futures::stream::unfold(scan, |mut scan| async move {
            if scan.next_frame >= scan.event.frame_count {
                return None;
            }
            if let Some(delay) = scan.frame_delay {
                sleep(delay).await;
            }
            let frame = scan.acquire();
            Some((frame, scan))
        });

        Ok(stream.boxed())
    }
}

#[async_trait]
impl OutputLabeling for MockScanEngine {
    async fn set_output_label(&self, prefix: &Path) -> Result<()> {
        self.command(
            HardwareCall::SetOutputLabel(prefix.to_path_buf()),
            "set_output_label",
        )
        .await?;
        self.sim.instrument.lock().label = Some(prefix.to_path_buf());
        Ok(())
    }
}

#[async_trait]
impl DetectorControl for MockScanEngine {
    async fn set_detector_power(&self, on: bool) -> Result<()> {
        self.command(HardwareCall::DetectorPower(on), "set_detector_power")
            .await?;
        self.sim.instrument.lock().detector_powered = on;
        tracing::debug!(on, "MockScanEngine: PMT high voltage switched");
        Ok(())
    }

    async fn clear_detector_overload(&self) -> Result<()> {
        self.command(HardwareCall::ClearOverload, "clear_detector_overload")
            .await?;
        let mut instrument = self.sim.instrument.lock();
        if instrument.detector_powered {
            tracing::debug!("MockScanEngine: overload clear ignored while PMT is powered");
        } else {
            instrument.overload_latched = false;
        }
        Ok(())
    }
}

#[async_trait]
impl ShutterControl for MockScanEngine {
    async fn open_shutter(&self) -> Result<()> {
        self.command(HardwareCall::OpenShutter, "open_shutter").await?;
        self.sim.instrument.lock().shutter_open = true;
        Ok(())
    }

    async fn close_shutter(&self) -> Result<()> {
        self.command(HardwareCall::CloseShutter, "close_shutter")
            .await?;
        self.sim.instrument.lock().shutter_open = false;
        Ok(())
    }
}

#[async_trait]
impl Configurable for MockScanEngine {
    async fn apply_setup(&self, setup: &DeviceSetup) -> Result<()> {
        self.command(HardwareCall::ApplySetup, "apply_setup").await?;
        setup
            .validate()
            .map_err(|reason| anyhow::anyhow!("{DRIVER_TYPE}: rejected setup: {reason}"))?;

        let mut instrument = self.sim.instrument.lock();
        instrument.pixels = setup.resolution.pixels();
        instrument.setup = Some(setup.clone());
        tracing::info!(
            channel = %setup.channel,
            filter = %setup.filter,
            lens = %setup.lens,
            resolution = %setup.resolution,
            "MockScanEngine: device setup applied"
        );
        Ok(())
    }
}
