//! Tracing setup for the driver and the CLI.
//!
//! Level and format come from `[application]` in the settings file. `RUST_LOG`
//! takes precedence over the configured level. At `debug` and finer, the
//! instrumented session operations also log when their spans close, which
//! gives per-command timings.
//!
//! # Example
//! ```no_run
//! use sr620_daq::{config::Settings, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load()?;
//! logging::init_from_settings(&settings)?;
//! info!("Counter tool started");
//! # Ok(())
//! # }
//! ```

use crate::config::Settings;
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Log line format.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, coloured. For watching a run interactively.
    Pretty,
    /// One line per event.
    #[default]
    Compact,
    /// JSON lines, for capturing long unattended runs.
    Json,
}

/// Resolved logging options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracingConfig {
    /// Most verbose level emitted when `RUST_LOG` is unset.
    pub level: Level,
    /// Line format.
    pub format: OutputFormat,
}

impl TracingConfig {
    /// Level and format from the `[application]` section.
    pub fn from_settings(settings: &Settings) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&settings.application.log_level)?,
            format: settings.application.log_format,
        })
    }

    /// Replace the format, e.g. from a command-line flag.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    fn span_events(&self) -> FmtSpan {
        if self.level >= Level::DEBUG {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Install the global subscriber described by `settings`.
pub fn init_from_settings(settings: &Settings) -> Result<(), String> {
    init(TracingConfig::from_settings(settings)?)
}

/// Install the global subscriber.
///
/// A second call, or a call after the host application installed its own
/// subscriber, is a no-op.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let layer = fmt::layer()
        .with_target(false)
        .with_span_events(config.span_events());
    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        OutputFormat::Pretty => layer.pretty().boxed(),
        OutputFormat::Compact => layer.compact().with_ansi(false).boxed(),
        OutputFormat::Json => layer.json().boxed(),
    };

    match tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
    {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(format!("Failed to initialize tracing: {e}")),
    }
}

/// Case-insensitive level name.
fn parse_log_level(level: &str) -> Result<Level, String> {
    level.parse::<Level>().map_err(|_| {
        format!("Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error")
    })
}
