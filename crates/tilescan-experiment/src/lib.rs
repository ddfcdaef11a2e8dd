//! Tiled FLIM acquisition orchestration.
//!
//! - [`handler::AcquisitionEventHandler`]: per-event label, execute, rename, record, overload check
//! - [`recovery::RecoveryProtocol`]: PMT power-cycle after a detected shut-off
//! - [`run_engine::RunEngine`]: run lifecycle, cancellation, shutdown, progress events
//! - [`sequence::TileSequence`]: position-by-time-loop event schedule
//! - [`positions`]: CSV position list reader
//! - [`tile_identity`] and [`tile_config`]: tile naming and the stitching manifest

pub mod handler;
pub mod positions;
pub mod recovery;
pub mod run_engine;
pub mod sequence;
pub mod tile_config;
pub mod tile_identity;

pub use handler::{finalize_instrument_files, AcquisitionEventHandler, TileOutcome};
pub use positions::{parse_positions, read_position_list};
pub use recovery::{RecoveryProtocol, RecoveryReport, RecoveryTiming};
pub use run_engine::{EngineState, RunEngine, RunEvent, RunOptions, RunStatus, RunSummary};
pub use sequence::TileSequence;
pub use tile_config::{tile_config_line, TileConfigRecorder, TILE_CONFIG_FILE};
pub use tile_identity::{tile_basename, tile_prefix, TileCounter, TileId};
