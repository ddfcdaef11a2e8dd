//! `tilescan` command-line entry point.
//!
//! Startup checks run in order and stop before any hardware is touched:
//!
//! 1. `$TILESCAN_DEVICE_PATH` must be set
//! 2. the save directory, if given, must not exist
//! 3. the hardware config must load and validate
//! 4. the position list must parse
//!
//! Only then is the save directory created, the device setup applied, and
//! the run started. Ctrl-C aborts at the next event boundary; a second
//! Ctrl-C exits without waiting.
//!
//! ```bash
//! TILESCAN_DEVICE_PATH=/opt/scope tilescan positions.csv --frames 3 --save run1
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod cli;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use config::{TileScanConfig, DEVICE_PATH_ENV};
use std::path::PathBuf;
use std::sync::Arc;
use tilescan_core::{Configurable, TileScanError};
use tilescan_driver_mock::MockScanEngine;
use tilescan_experiment::{read_position_list, RunEngine, RunEvent, TileSequence};
use tilescan_storage::TiffStackWriter;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let device_path = std::env::var_os(DEVICE_PATH_ENV)
        .map(PathBuf::from)
        .ok_or_else(|| {
            TileScanError::Configuration(format!(
                "{DEVICE_PATH_ENV} must point to the hardware module directory"
            ))
        })?;

    if let Some(save_dir) = &cli.save {
        if save_dir.exists() {
            return Err(TileScanError::PreexistingOutput {
                path: save_dir.clone(),
            }
            .into());
        }
    }

    let config = TileScanConfig::load(&device_path, cli.config.as_deref())?;
    let setup = cli.device_setup(config.setup.clone());
    setup.validate().map_err(TileScanError::Configuration)?;

    let positions = read_position_list(&cli.position_csv)?;
    let sequence = TileSequence::new(positions, cli.frames)?
        .with_hardware_sequencing(!cli.no_hardware_sequencing);
    info!(
        positions = sequence.positions().len(),
        frames = sequence.frames(),
        events = sequence.len(),
        "Position list loaded"
    );

    if let Some(save_dir) = &cli.save {
        std::fs::create_dir_all(save_dir)
            .with_context(|| format!("Failed to create save directory {}", save_dir.display()))?;
    }

    let hardware = Arc::new(MockScanEngine::with_config(config.engine.clone()));
    hardware
        .apply_setup(&setup)
        .await
        .map_err(|source| TileScanError::Hardware {
            operation: "apply_setup",
            source,
        })?;

    let mut engine = RunEngine::new(hardware, cli.save.clone(), config.run);
    if cli.save.is_some() {
        engine = engine.with_sink(Arc::new(TiffStackWriter::new()));
    }
    let engine = Arc::new(engine);

    let progress = tokio::spawn(report_progress(engine.subscribe()));

    let mut runner = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run(&sequence).await })
    };

    let outcome = tokio::select! {
        joined = &mut runner => joined,
        _ = signal::ctrl_c() => {
            warn!("Interrupt received, stopping after the current event (Ctrl-C again to exit now)");
            engine.abort("interrupted by operator").await;
            tokio::select! {
                joined = &mut runner => joined,
                _ = signal::ctrl_c() => {
                    anyhow::bail!("Interrupted twice, exiting without waiting for hardware shutdown");
                }
            }
        }
    };
    drop(engine);
    if let Err(e) = progress.await {
        warn!("Progress reporter stopped: {e}");
    }

    let summary = outcome.context("Acquisition task panicked")??;
    info!(
        tiles = summary.tiles,
        recoveries = summary.recoveries,
        persistence_warnings = summary.persistence_warnings,
        "Acquisition complete"
    );
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn report_progress(mut events: tokio::sync::broadcast::Receiver<RunEvent>) {
    loop {
        match events.recv().await {
            Ok(RunEvent::RunStarted { total_events }) => {
                info!("Detector warm, acquiring {total_events} events");
            }
            Ok(RunEvent::TileAcquired { tile, x, y, frames }) => {
                debug!("Acquired {tile} at ({x:?}, {y:?}) with {frames} frames");
            }
            Ok(RunEvent::RecoveryPerformed { tile, position }) => {
                warn!("PMT reset after {tile} (position {position})");
            }
            Ok(RunEvent::PersistenceWarning { tile, message }) => {
                warn!("Combined image for {tile} not written: {message}");
            }
            Ok(RunEvent::RunFinished { status, tiles }) => {
                info!("Run {status:?} after {tiles} tiles");
                break;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Progress reporter skipped {skipped} events");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
