//! Data model shared by the hardware layer and the acquisition loop.
//!
//! Everything here is plain data: stage positions, scheduled events, the
//! frames a hardware engine yields for one event, and the transient state of
//! a detector recovery attempt.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw photon-count image as produced by the detector (row-major, `[height, width]`).
pub type Image = Array2<u16>;

/// Frame-to-frame difference image. Negative samples mean "fewer counts than the prior frame".
pub type DeltaImage = Array2<i32>;

/// Stage position in micrometres.
///
/// Read once from the position list and never mutated. A position's identity
/// is its index in the list, not its coordinates; duplicate coordinates are legal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Stage X coordinate
    pub x: f64,
    /// Stage Y coordinate
    pub y: f64,
    /// Focus (Z) coordinate
    pub z: f64,
}

impl Position {
    /// Create a new position.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Index of an event along the sequence axes (`p` = position, `t` = time loop).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EventIndex {
    /// Index into the position list
    pub position: usize,
    /// Time-loop iteration (first iteration of the event when hardware-sequenced)
    pub time: usize,
}

impl fmt::Display for EventIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p={} t={}", self.position, self.time)
    }
}

/// One scheduled unit of work.
///
/// Created by the sequencer, consumed exactly once by the event handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionEvent {
    /// Opaque ordinal assigned by the sequencer
    pub sequence: usize,
    /// Position along the sequence axes
    pub index: EventIndex,
    /// Stage position for this event
    pub position: Position,
    /// Number of frames the hardware acquires for this event
    pub frame_count: u32,
}

/// One frame yielded by the hardware engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Raw sample array
    pub image: Image,
    /// Stage position the frame was acquired at
    pub position: Position,
    /// Index of the event that produced the frame
    pub index: EventIndex,
}

impl Frame {
    /// Create a frame from an image and the event it belongs to.
    pub fn new(image: Image, event: &AcquisitionEvent) -> Self {
        Self {
            image,
            position: event.position,
            index: event.index,
        }
    }

    /// Image shape as `(height, width)`.
    pub fn shape(&self) -> (usize, usize) {
        self.image.dim()
    }

    /// Total photon count in the frame.
    pub fn total_counts(&self) -> u64 {
        self.image.iter().map(|&v| u64::from(v)).sum()
    }
}

/// Detector recovery state.
///
/// Lives only for the duration of one recovery attempt and is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryState {
    /// Normal operation (entry and exit state)
    Armed,
    /// High voltage being switched off
    PoweringDown,
    /// Overload latch being cleared
    Clearing,
    /// High voltage being switched back on
    PoweringUp,
    /// Waiting for the HV supply to stabilise
    Settling,
}

impl fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RecoveryState::Armed => "armed",
            RecoveryState::PoweringDown => "powering_down",
            RecoveryState::Clearing => "clearing",
            RecoveryState::PoweringUp => "powering_up",
            RecoveryState::Settling => "settling",
        };
        write!(f, "{}", label)
    }
}
