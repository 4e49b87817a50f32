//! Settings loading using Figment.
//!
//! Settings are layered from:
//! 1. `config/sr620.toml` (or a path given on the command line)
//! 2. Environment variables prefixed with `SR620_`, nested keys separated by `__`
//!
//! Every section has defaults, so a missing file yields a usable configuration.
//!
//! # Example
//! ```no_run
//! use sr620_daq::config::Settings;
//!
//! let settings = Settings::load()?;
//! settings.validate()?;
//! println!("Port: {}", settings.serial.port);
//! # Ok::<(), sr620_daq::error::DaqError>(())
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppResult, DaqError};
use crate::hardware::serial::DEFAULT_BAUD_RATE;
use crate::hardware::sr620_config::{ConfigurationUpdate, SampleCount};
use crate::logging::OutputFormat;

/// Default settings file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/sr620.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SR620_";

/// Top-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Application name and log level.
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial link.
    #[serde(default)]
    pub serial: SerialConfig,
    /// Session timing.
    #[serde(default)]
    pub session: SessionConfig,
    /// Output files.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Instrument parameters applied right after connecting.
    #[serde(default)]
    pub counter: ConfigurationUpdate,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log line format (pretty, compact, json)
    #[serde(default)]
    pub log_format: OutputFormat,
}

/// Serial link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
    #[serde(default = "default_port")]
    pub port: String,
    /// Line rate; the counter supports 1200 to 19200 baud.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Quiet period that ends a drain, in milliseconds
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
    /// Reply deadline in milliseconds. Unset waits indefinitely, which suits
    /// long gated measurements.
    #[serde(default)]
    pub response_timeout_ms: Option<u64>,
}

/// Session behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Delay between writing a configuration and reading it back
    #[serde(default = "default_settle")]
    pub settle_ms: u64,
    /// Log progress estimates during long measurements
    #[serde(default = "default_progress")]
    pub progress: bool,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Output directory for CSV files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

// Default value functions
fn default_name() -> String {
    "SR620 Counter".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_drain_timeout() -> u64 {
    50
}

fn default_settle() -> u64 {
    500
}

fn default_progress() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            drain_timeout_ms: default_drain_timeout(),
            response_timeout_ms: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_ms: default_settle(),
            progress: default_progress(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

impl Settings {
    /// Load from the default file and the environment.
    ///
    /// Example override: `SR620_SERIAL__PORT=/dev/ttyS1`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(DaqError::Validation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.serial.port.trim().is_empty() {
            return Err(DaqError::Validation("serial.port is empty".to_string()));
        }

        let valid_bauds = [1200, 2400, 4800, 9600, 19200];
        if !valid_bauds.contains(&self.serial.baud_rate) {
            return Err(DaqError::Validation(format!(
                "Invalid baud_rate {}. The counter supports: {:?}",
                self.serial.baud_rate, valid_bauds
            )));
        }

        if self.serial.drain_timeout_ms == 0 {
            return Err(DaqError::Validation(
                "serial.drain_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.serial.response_timeout_ms == Some(0) {
            return Err(DaqError::Validation(
                "serial.response_timeout_ms must be greater than zero when set".to_string(),
            ));
        }

        if let Some(size) = self.counter.sample_count {
            SampleCount::new(size)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sr620_config::{Arming, Mode};
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.serial.baud_rate, 9600);
        assert!(settings.counter.is_empty());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let settings = Settings::load_from("does/not/exist.toml").unwrap();
        assert_eq!(settings.application.log_level, "info");
        assert_eq!(settings.session.settle_ms, 500);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
name = "Bench counter"
log_level = "debug"
log_format = "json"

[serial]
port = "/dev/ttyS3"
response_timeout_ms = 30000

[counter]
mode = "freq"
arming = "0.1s"
sample_count = 100
"#
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.application.name, "Bench counter");
        assert_eq!(settings.application.log_format, OutputFormat::Json);
        assert_eq!(settings.serial.port, "/dev/ttyS3");
        assert_eq!(settings.serial.response_timeout_ms, Some(30_000));
        assert_eq!(settings.serial.drain_timeout_ms, 50);
        assert_eq!(settings.counter.mode, Some(Mode::Frequency));
        assert_eq!(settings.counter.arming, Some(Arming::Gate100ms));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "verbose".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_invalid_counter_defaults() {
        let mut settings = Settings::default();
        settings.counter.sample_count = Some(3);
        assert!(matches!(settings.validate(), Err(DaqError::Validation(_))));

        let mut settings = Settings::default();
        settings.serial.drain_timeout_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_unknown_symbol_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[counter]\narming = \"2s\"").unwrap();
        assert!(matches!(
            Settings::load_from(file.path()),
            Err(DaqError::Config(_))
        ));
    }
}
