//! Event schedule for a tiled run.
//!
//! Axis order is position first, then time loop. With hardware sequencing
//! the loop iterations at one position are merged into a single event that
//! yields `frames` frames; without it each `(p, t)` pair is its own event.

use tilescan_core::{AcquisitionEvent, EventIndex, Position, ScanResult, TileScanError};

/// Position list times time loop.
#[derive(Debug, Clone)]
pub struct TileSequence {
    positions: Vec<Position>,
    frames: u32,
    hardware_sequencing: bool,
}

impl TileSequence {
    /// Hardware-sequenced schedule of `frames` frames per position.
    ///
    /// # Errors
    ///
    /// [`TileScanError::Configuration`] if `frames` is zero.
    pub fn new(positions: Vec<Position>, frames: u32) -> ScanResult<Self> {
        if frames == 0 {
            return Err(TileScanError::Configuration(
                "frame count must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            positions,
            frames,
            hardware_sequencing: true,
        })
    }

    /// Merge time-loop iterations per position into one event (default on).
    pub fn with_hardware_sequencing(mut self, enabled: bool) -> Self {
        self.hardware_sequencing = enabled;
        self
    }

    /// Stage positions in file order.
    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Frames per position.
    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Whether loop iterations are merged.
    pub fn hardware_sequencing(&self) -> bool {
        self.hardware_sequencing
    }

    /// Number of events [`events`](Self::events) yields.
    pub fn len(&self) -> usize {
        if self.hardware_sequencing {
            self.positions.len()
        } else {
            self.positions.len() * self.frames as usize
        }
    }

    /// True if there are no positions.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Events in execution order, with sequence numbers `0..len()`.
    pub fn events(&self) -> impl Iterator<Item = AcquisitionEvent> + '_ {
        let per_position = if self.hardware_sequencing {
            1
        } else {
            self.frames as usize
        };
        let frame_count = if self.hardware_sequencing {
            self.frames
        } else {
            1
        };

        self.positions
            .iter()
            .enumerate()
            .flat_map(move |(p, &position)| {
                (0..per_position).map(move |t| AcquisitionEvent {
                    sequence: p * per_position + t,
                    index: EventIndex { position: p, time: t },
                    position,
                    frame_count,
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions() -> Vec<Position> {
        vec![
            Position::new(0.0, 0.0, 1.0),
            Position::new(10.0, 0.0, 1.0),
            Position::new(10.0, 10.0, 1.0),
        ]
    }

    #[test]
    fn test_hardware_sequenced_one_event_per_position() {
        let sequence = TileSequence::new(positions(), 4).unwrap();
        let events: Vec<_> = sequence.events().collect();

        assert_eq!(events.len(), 3);
        assert_eq!(sequence.len(), 3);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.sequence, i);
            assert_eq!(event.index, EventIndex { position: i, time: 0 });
            assert_eq!(event.frame_count, 4);
            assert_eq!(event.position, positions()[i]);
        }
    }

    #[test]
    fn test_unsequenced_position_major_order() {
        let sequence = TileSequence::new(positions(), 2)
            .unwrap()
            .with_hardware_sequencing(false);
        let indices: Vec<_> = sequence.events().map(|e| (e.index.position, e.index.time)).collect();

        assert_eq!(indices, vec![(0, 0), (0, 1), (1, 0), (1, 1), (2, 0), (2, 1)]);
        assert_eq!(sequence.len(), 6);
        assert!(sequence.events().all(|e| e.frame_count == 1));
        assert!(sequence.events().enumerate().all(|(i, e)| e.sequence == i));
    }

    #[test]
    fn test_zero_frames_rejected() {
        assert!(matches!(
            TileSequence::new(positions(), 0),
            Err(TileScanError::Configuration(_))
        ));
    }

    #[test]
    fn test_empty_position_list() {
        let sequence = TileSequence::new(Vec::new(), 1).unwrap();
        assert!(sequence.is_empty());
        assert_eq!(sequence.events().count(), 0);
    }
}
