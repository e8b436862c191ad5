//! Configuration using Figment
//!
//! Configuration is layered, later sources winning:
//! 1. Built-in defaults
//! 2. `dfcore.toml` in the working directory, or the file given with `--config`
//! 3. Environment variables prefixed with `DFCORE_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! DFCORE_LOGGING__LEVEL=debug
//! DFCORE_EXPOSURE__READOUT_MODE=high
//! DFCORE_EXPOSURE__POLL_INTERVAL_MS=50
//! DFCORE_SIMULATION__ON_CHIP_BINNING=false
//! ```
//!
//! # Example file
//!
//! ```toml
//! [logging]
//! level = "info"
//! json = false
//!
//! [exposure]
//! readout_mode = "medium"
//! poll_interval_ms = 0
//!
//! [simulation]
//! pixels_x = 2048
//! pixels_y = 2048
//! cooler_setpoint_min = -20.0
//! cooler_setpoint_max = 10.0
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::driver::sim::SimConfig;
use crate::exposure::{PollPolicy, ReadoutMode};

/// File read when no `--config` path is given
pub const DEFAULT_CONFIG_FILE: &str = "dfcore.toml";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "DFCORE_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    #[error("Configuration file not found: {0}")]
    MissingFile(PathBuf),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DfConfig {
    pub logging: LoggingConfig,
    pub exposure: ExposureConfig,
    /// Parameters of the simulated camera
    pub simulation: SimConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    /// Readout mode used unless the command line overrides it
    pub readout_mode: ReadoutMode,
    /// Pause between status queries while waiting for an exposure (0 = none)
    pub poll_interval_ms: u64,
}

impl DfConfig {
    /// Figment with all layers for `path` (or the default file).
    pub fn figment(path: Option<&Path>) -> Figment {
        let file = match path {
            Some(path) => Toml::file_exact(path),
            None => Toml::file(DEFAULT_CONFIG_FILE),
        };
        Figment::from(Serialized::defaults(DfConfig::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate.
    ///
    /// An explicitly given file must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::MissingFile(path.to_path_buf()));
            }
        }

        let config: DfConfig = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but make no sense.
    pub fn validate(&self) -> Result<(), ConfigError> {
        LevelFilter::from_str(&self.logging.level).map_err(|_| {
            ConfigError::ValidationError(format!(
                "unknown log level '{}'",
                self.logging.level
            ))
        })?;

        let sim = &self.simulation;
        if sim.pixels_x == 0 || sim.pixels_y == 0 {
            return Err(ConfigError::ValidationError(
                "simulated sensor must have non-zero dimensions".into(),
            ));
        }
        if sim.cooler_setpoint_min > sim.cooler_setpoint_max {
            return Err(ConfigError::ValidationError(format!(
                "cooler setpoint range is inverted ({} > {})",
                sim.cooler_setpoint_min, sim.cooler_setpoint_max
            )));
        }
        if sim.min_exposure_duration < 0.0 || sim.exposure_precision < 0.0 {
            return Err(ConfigError::ValidationError(
                "exposure limits must not be negative".into(),
            ));
        }
        if sim.max_bin_x == 0 || sim.max_bin_y == 0 {
            return Err(ConfigError::ValidationError(
                "maximum binning must be at least 1".into(),
            ));
        }
        if sim.time_scale < 0.0 {
            return Err(ConfigError::ValidationError(
                "simulation time scale must not be negative".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.exposure.poll_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = DfConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config, DfConfig::default());
            assert_eq!(config.exposure.readout_mode, ReadoutMode::Medium);
            assert!(config.poll_policy().interval.is_zero());
            Ok(())
        });
    }

    #[test]
    fn test_file_and_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                [exposure]
                readout_mode = "low-stack-pro"
                poll_interval_ms = 25

                [simulation]
                pixels_x = 640
                on_chip_binning = false
                "#,
            )?;
            jail.set_env("DFCORE_LOGGING__LEVEL", "debug");
            jail.set_env("DFCORE_SIMULATION__PIXELS_Y", "480");

            let config = DfConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.exposure.readout_mode, ReadoutMode::LowStackPro);
            assert_eq!(config.poll_policy().interval, Duration::from_millis(25));
            assert_eq!(config.simulation.pixels_x, 640);
            assert_eq!(config.simulation.pixels_y, 480);
            assert!(!config.simulation.on_chip_binning);
            assert_eq!(config.logging.level, "debug");
            Ok(())
        });
    }

    #[test]
    fn test_explicit_file_must_exist() {
        Jail::expect_with(|_jail| {
            let err = DfConfig::load(Some(Path::new("missing.toml"))).unwrap_err();
            assert!(matches!(err, ConfigError::MissingFile(_)));
            Ok(())
        });
    }

    #[test]
    fn test_inverted_cooler_range_rejected() {
        let mut config = DfConfig::default();
        config.simulation.cooler_setpoint_min = 5.0;
        config.simulation.cooler_setpoint_max = -5.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let mut config = DfConfig::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());
    }
}
