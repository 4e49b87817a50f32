//! CLI entry point for the SR620 counter.
//!
//! # Usage
//!
//! ```bash
//! sr620 status --json
//! sr620 configure --arming 0.1s --sample-count 100
//! sr620 measure --statistic jitter
//! sr620 series --count 50 --save
//! sr620 monitor --output run.csv        # Ctrl-C to stop
//! sr620 allan --samples 1000 --estimator oadev --save
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sr620_daq::config::Settings;
use sr620_daq::data::allan::{AllanEstimator, TauSpacing};
use sr620_daq::data::storage::{timestamped_path, CsvSink, MeasurementSink};
use sr620_daq::hardware::sr620_config::{
    Arming, ClockFrequency, ClockSource, ConfigurationUpdate, JitterKind, Mode, Source,
};
use sr620_daq::logging::{self, OutputFormat, TracingConfig};
use sr620_daq::measurement::Statistic;
use sr620_daq::session::SessionOptions;
use sr620_daq::Sr620;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "sr620")]
#[command(about = "Control and measure with an SR620 time interval counter", long_about = None)]
struct Cli {
    /// Settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial port, overriding the settings file
    #[arg(long, global = true)]
    port: Option<String>,

    /// Log output format, overriding the settings file
    #[arg(long, global = true, value_enum)]
    log_format: Option<OutputFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the instrument configuration
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Change instrument parameters; unspecified ones are kept
    Configure(ConfigureArgs),

    /// Take one reading
    Measure {
        #[arg(long, default_value = "mean")]
        statistic: Statistic,
    },

    /// Take a fixed number of readings
    Series {
        #[arg(long, default_value = "mean")]
        statistic: Statistic,
        #[arg(long, default_value_t = 10)]
        count: usize,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Take readings until interrupted with Ctrl-C
    Monitor {
        #[arg(long, default_value = "mean")]
        statistic: Statistic,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Run an Allan deviation sweep at the current gate time
    Allan {
        /// Number of single-sample readings
        #[arg(long, default_value_t = 100)]
        samples: usize,
        /// adev, oadev or mdev
        #[arg(long, default_value = "oadev")]
        estimator: AllanEstimator,
        /// octave, decade or all
        #[arg(long, default_value = "octave")]
        spacing: TauSpacing,
        /// Print the series as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args)]
struct ConfigureArgs {
    #[arg(long)]
    mode: Option<Mode>,
    #[arg(long)]
    source: Option<Source>,
    #[arg(long)]
    jitter: Option<JitterKind>,
    #[arg(long, allow_hyphen_values = true)]
    arming: Option<Arming>,
    #[arg(long)]
    sample_count: Option<u32>,
    #[arg(long)]
    clock: Option<ClockSource>,
    #[arg(long)]
    clock_frequency: Option<ClockFrequency>,
}

impl From<ConfigureArgs> for ConfigurationUpdate {
    fn from(args: ConfigureArgs) -> Self {
        Self {
            mode: args.mode,
            source: args.source,
            jitter: args.jitter,
            arming: args.arming,
            sample_count: args.sample_count,
            clock: args.clock,
            clock_frequency: args.clock_frequency,
        }
    }
}

#[derive(Args)]
struct OutputArgs {
    /// CSV file to write
    #[arg(long)]
    output: Option<PathBuf>,
    /// Write a timestamped CSV into the configured output directory
    #[arg(long, conflicts_with = "output")]
    save: bool,
}

impl OutputArgs {
    fn open(&self, settings: &Settings, kind: &str) -> Result<Option<CsvSink>> {
        let path = match (&self.output, self.save) {
            (Some(path), _) => path.clone(),
            (None, true) => timestamped_path(&settings.storage.output_dir, kind),
            (None, false) => return Ok(None),
        };
        let sink = CsvSink::create(&path)
            .with_context(|| format!("Failed to open output file {}", path.display()))?;
        Ok(Some(sink))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("Failed to load settings")?;
    if let Some(port) = &cli.port {
        settings.serial.port.clone_from(port);
    }
    settings.validate().context("Invalid settings")?;

    let mut tracing_config = TracingConfig::from_settings(&settings).map_err(anyhow::Error::msg)?;
    if let Some(format) = cli.log_format {
        tracing_config = tracing_config.with_format(format);
    }
    logging::init(tracing_config).map_err(anyhow::Error::msg)?;

    let mut counter = Sr620::open(
        &settings.serial.port,
        settings.serial.baud_rate,
        SessionOptions::from(&settings),
    )
    .await
    .with_context(|| format!("Failed to connect to SR620 on {}", settings.serial.port))?;

    if !settings.counter.is_empty() {
        counter
            .set_configuration(&settings.counter)
            .await
            .context("Failed to apply counter defaults from settings")?;
    }

    let result = run(&mut counter, &settings, cli.command).await;
    if let Err(err) = counter.close().await {
        warn!(error = %err, "Close failed");
    }
    result
}

async fn run(counter: &mut Sr620, settings: &Settings, command: Commands) -> Result<()> {
    match command {
        Commands::Status { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(counter.configuration())?);
            } else {
                println!("{}", counter.configuration());
            }
        }
        Commands::Configure(args) => {
            let confirmed = counter.set_configuration(&args.into()).await?;
            println!("{confirmed}");
        }
        Commands::Measure { statistic } => {
            let value = counter.measure_once(statistic).await?;
            println!("{value}");
        }
        Commands::Series {
            statistic,
            count,
            output,
        } => {
            let mut sink = output.open(settings, statistic.symbol())?;
            let samples = counter
                .measure_set(statistic, count, sink.as_mut().map(|s| s as &mut dyn MeasurementSink))
                .await?;
            for sample in &samples {
                println!("{}\t{}", sample.timestamp.to_rfc3339(), sample.value);
            }
        }
        Commands::Monitor { statistic, output } => {
            let mut sink = output.open(settings, statistic.symbol())?;
            let liveness = counter.liveness();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, stopping after the current reading");
                    liveness.cancel("interrupted");
                }
            });
            let samples = counter
                .measure_unbounded(statistic, sink.as_mut().map(|s| s as &mut dyn MeasurementSink))
                .await?;
            info!(samples = samples.len(), "Monitor stopped");
        }
        Commands::Allan {
            samples,
            estimator,
            spacing,
            json,
            output,
        } => {
            let mut sink = output.open(settings, "allan")?;
            let series = counter
                .allan_sweep_with(
                    samples,
                    estimator,
                    spacing,
                    sink.as_mut().map(|s| s as &mut dyn MeasurementSink),
                )
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&series)?);
            } else {
                println!("tau_s\t{estimator}\terror");
                for point in series.points() {
                    println!("{}\t{:e}\t{:e}", point.tau, point.deviation, point.error);
                }
            }
        }
    }
    Ok(())
}
