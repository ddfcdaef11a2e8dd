//! Shared simulation infrastructure for the mock scan engine.
//!
//! - [`mode`]: instant versus hardware-paced behaviour
//! - [`timing`]: stage, frame, and detector delays for realistic mode
//! - [`rng`]: seeded randomness for photon counts and failure decisions
//! - [`errors`]: per-operation failure injection

pub mod errors;
pub mod mode;
pub mod rng;
pub mod timing;

pub use errors::{ErrorConfig, ErrorScenario};
pub use mode::MockMode;
pub use rng::MockRng;
pub use timing::ScanTiming;
