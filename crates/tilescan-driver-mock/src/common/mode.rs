//! Operational modes for the mock scan engine.

use serde::{Deserialize, Serialize};

/// How closely the mock follows real instrument pacing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MockMode {
    /// No delays. Frames are produced as fast as they are polled.
    #[default]
    Instant,
    /// Stage moves and frame scans take wall-clock time from [`ScanTiming`](super::ScanTiming).
    Realistic,
}

impl MockMode {
    /// True if the mock should sleep to simulate hardware latency.
    pub fn is_paced(self) -> bool {
        matches!(self, MockMode::Realistic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode() {
        assert_eq!(MockMode::default(), MockMode::Instant);
        assert!(!MockMode::Instant.is_paced());
        assert!(MockMode::Realistic.is_paced());
    }

    #[test]
    fn test_mode_from_toml_string() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: MockMode,
        }
        let parsed: Wrapper = toml::from_str(r#"mode = "realistic""#).unwrap();
        assert_eq!(parsed.mode, MockMode::Realistic);
    }
}
