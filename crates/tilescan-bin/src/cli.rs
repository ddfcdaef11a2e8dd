//! Command-line arguments.

use clap::Parser;
use std::path::PathBuf;
use tilescan_core::{DeviceSetup, ScanResolution};

/// Unattended tiled FLIM acquisition with automatic PMT overload recovery.
#[derive(Debug, Parser)]
#[command(name = "tilescan")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// CSV file with one `X,Y,Z` stage position per row (no header)
    pub position_csv: PathBuf,

    /// Frames per position
    #[arg(short, long, default_value_t = 1)]
    pub frames: u32,

    /// Directory for tiles and the stitching manifest (must not exist)
    #[arg(short, long)]
    pub save: Option<PathBuf>,

    /// Hardware config file (TOML), relative to $TILESCAN_DEVICE_PATH unless absolute
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Pockels cell voltage
    #[arg(long)]
    pub eom: Option<f64>,

    /// PMT gain in percent
    #[arg(long)]
    pub pmt_gain: Option<f64>,

    /// Scan resolution in pixels per side (256, 512 or 1024)
    #[arg(long, value_parser = parse_resolution)]
    pub resolution: Option<ScanResolution>,

    /// Skip the TCSPC SYNC signal check
    #[arg(long)]
    pub no_sync_check: bool,

    /// Acquire each frame as its own event instead of one event per position
    #[arg(long)]
    pub no_hardware_sequencing: bool,

    /// Debug-level logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Layer command-line settings over the configured device setup.
    ///
    /// Instrument file saving follows `--save`: without a save directory the
    /// instrument writes nothing.
    pub fn device_setup(&self, mut setup: DeviceSetup) -> DeviceSetup {
        if let Some(eom) = self.eom {
            setup.eom_voltage = eom;
        }
        if let Some(gain) = self.pmt_gain {
            setup.pmt_gain_percent = gain;
        }
        if let Some(resolution) = self.resolution {
            setup.resolution = resolution;
        }
        if self.no_sync_check {
            setup.sync_check = false;
        }
        setup.flim_file_saving = self.save.is_some();
        setup
    }
}

fn parse_resolution(value: &str) -> Result<ScanResolution, String> {
    let pixels: u32 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a pixel count"))?;
    ScanResolution::try_from(pixels)
}
