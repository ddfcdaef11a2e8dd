//! Hardware configuration for the `tilescan` binary.
//!
//! Layers, lowest priority first:
//!
//! 1. built-in defaults
//! 2. the TOML file given with `--config` (relative paths resolve against
//!    the device directory)
//! 3. `TILESCAN_`-prefixed environment variables, nested with `__`
//!    (`TILESCAN_SETUP__PMT_GAIN_PERCENT=55`)
//!
//! ```toml
//! [engine]
//! pixels = 256
//! seed = 7
//! mode = "realistic"
//! overload_at = [{ event = 3, frame = 1 }]
//!
//! [setup]
//! lens = "20X 0.75 Nikon"
//! pmt_gain_percent = 70.0
//!
//! [run]
//! warmup_ms = 5000
//! ```

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tilescan_core::{DeviceSetup, ScanResult, TileScanError};
use tilescan_driver_mock::MockScanEngineConfig;
use tilescan_experiment::RunOptions;

/// Environment variable naming the hardware module directory.
pub const DEVICE_PATH_ENV: &str = "TILESCAN_DEVICE_PATH";

/// Prefix of configuration override variables.
const ENV_PREFIX: &str = "TILESCAN_";

/// Complete hardware and run configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileScanConfig {
    /// Scan engine simulation settings.
    pub engine: MockScanEngineConfig,
    /// One-shot device setup.
    pub setup: DeviceSetup,
    /// Warm-up and recovery timing.
    pub run: RunOptions,
}

impl TileScanConfig {
    /// Load defaults, then `config` (if any), then environment overrides.
    ///
    /// # Errors
    ///
    /// [`TileScanError::Configuration`] if the file is missing, cannot be
    /// parsed, or holds out-of-range values.
    pub fn load(device_path: &Path, config: Option<&Path>) -> ScanResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(TileScanConfig::default()));

        if let Some(file) = config {
            let file = resolve_config_path(device_path, file);
            if !file.exists() {
                return Err(TileScanError::Configuration(format!(
                    "Hardware config file not found: {}",
                    file.display()
                )));
            }
            tracing::debug!(path = %file.display(), "Loading hardware config");
            figment = figment.merge(Toml::file(&file));
        }

        let loaded: TileScanConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| TileScanError::Configuration(e.to_string()))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Check every section.
    pub fn validate(&self) -> ScanResult<()> {
        self.engine
            .validate()
            .map_err(|e| TileScanError::Configuration(e.to_string()))?;
        self.setup
            .validate()
            .map_err(TileScanError::Configuration)?;
        Ok(())
    }
}

/// Resolve a relative config path against the device directory.
pub fn resolve_config_path(device_path: &Path, config: &Path) -> PathBuf {
    if config.is_absolute() {
        config.to_path_buf()
    } else {
        device_path.join(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use tilescan_core::ScanResolution;
    use tilescan_driver_mock::MockMode;

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|jail| {
            let config = TileScanConfig::load(jail.directory(), None).unwrap();
            assert_eq!(config, TileScanConfig::default());
            assert_eq!(config.setup.pmt_gain_percent, 70.0);
            assert_eq!(config.run.warmup_ms, 5_000);
            Ok(())
        });
    }

    #[test]
    fn test_file_relative_to_device_path() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "rig.toml",
                r#"
                [engine]
                pixels = 64
                seed = 7
                mode = "realistic"
                overload_at = [{ event = 2, frame = 1 }]

                [setup]
                resolution = 512
                pmt_gain_percent = 55.0
                "#,
            )?;

            let config = TileScanConfig::load(jail.directory(), Some(Path::new("rig.toml"))).unwrap();
            assert_eq!(config.engine.pixels, 64);
            assert_eq!(config.engine.seed, Some(7));
            assert_eq!(config.engine.mode, MockMode::Realistic);
            assert_eq!(config.engine.overload_at.len(), 1);
            assert_eq!(config.setup.resolution, ScanResolution::Px512);
            assert_eq!(config.setup.pmt_gain_percent, 55.0);
            assert_eq!(config.setup.lens, "20X 0.75 Nikon");
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("rig.toml", "[setup]\npmt_gain_percent = 55.0\n")?;
            jail.set_env("TILESCAN_SETUP__PMT_GAIN_PERCENT", "40.5");

            let config = TileScanConfig::load(jail.directory(), Some(Path::new("rig.toml"))).unwrap();
            assert_eq!(config.setup.pmt_gain_percent, 40.5);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        Jail::expect_with(|jail| {
            let err = TileScanConfig::load(jail.directory(), Some(Path::new("absent.toml")))
                .unwrap_err();
            assert!(matches!(err, TileScanError::Configuration(_)));
            Ok(())
        });
    }

    #[test]
    fn test_out_of_range_gain_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("rig.toml", "[setup]\npmt_gain_percent = 150.0\n")?;
            let err = TileScanConfig::load(jail.directory(), Some(Path::new("rig.toml")))
                .unwrap_err();
            assert!(err.to_string().contains("pmt_gain_percent"));
            Ok(())
        });
    }

    #[test]
    fn test_absolute_config_path_kept() {
        assert_eq!(
            resolve_config_path(Path::new("/opt/scope"), Path::new("/etc/rig.toml")),
            PathBuf::from("/etc/rig.toml")
        );
        assert_eq!(
            resolve_config_path(Path::new("/opt/scope"), Path::new("rig.toml")),
            PathBuf::from("/opt/scope/rig.toml")
        );
    }
}
