//! Stanford Research SR620 Universal Time Interval Counter driver.
//!
//! Protocol overview:
//! - Baud: 9600, 8N1, no flow control
//! - Commands end with `\r`, replies end with `\r\n`
//! - `ENDT;STOP` at session start ends any talk mode and stops acquisition
//! - `SETP?` returns the full parameter set
//! - `MEAS? i` returns one reading of statistic `i`
//!
//! # Example Usage
//!
//! ```no_run
//! use sr620_daq::hardware::sr620::Sr620;
//! use sr620_daq::hardware::sr620_config::{Arming, ConfigurationUpdate};
//! use sr620_daq::measurement::Statistic;
//! use sr620_daq::session::SessionOptions;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut counter = Sr620::open("/dev/ttyUSB0", 9600, SessionOptions::default()).await?;
//!
//!     counter
//!         .set_configuration(&ConfigurationUpdate::new().arming(Arming::Gate100ms))
//!         .await?;
//!     let hz = counter.measure_once(Statistic::Mean).await?;
//!     println!("Frequency: {hz:.6} Hz");
//!
//!     counter.close().await?;
//!     Ok(())
//! }
//! ```

use tracing::{debug, error, info, instrument};

use crate::error::{AppResult, DaqError};
use crate::hardware::command_channel::{CommandChannel, Response};
use crate::hardware::serial::DynSerial;
use crate::hardware::sr620_config::{Configuration, ConfigurationUpdate, STATUS_QUERY};
use crate::session::{Liveness, SessionOptions, SessionState};

/// Sent once when a session starts.
pub const INIT_COMMAND: &str = "ENDT;STOP";

/// One connection to an SR620.
///
/// The session owns the command channel and the mirrored configuration.
/// Operations take `&mut self`, so only one transaction is ever in flight.
#[derive(Debug)]
pub struct Sr620 {
    pub(crate) channel: CommandChannel,
    pub(crate) config: Configuration,
    pub(crate) state: SessionState,
    pub(crate) liveness: Liveness,
    pub(crate) options: SessionOptions,
}

impl Sr620 {
    /// Open a serial device and start a session on it.
    pub async fn open(port_path: &str, baud_rate: u32, options: SessionOptions) -> AppResult<Self> {
        let port = crate::hardware::serial::open_port(port_path, baud_rate).await?;
        Self::connect(port, options).await
    }

    /// Start a session over an already-open transport.
    ///
    /// Sends the init command, then pulls the configuration. The session is
    /// `Ready` only once that first pull has succeeded.
    #[instrument(skip_all, err)]
    pub async fn connect(port: DynSerial, options: SessionOptions) -> AppResult<Self> {
        let channel = CommandChannel::new(port)
            .with_drain_timeout(options.drain_timeout)
            .with_response_timeout(options.response_timeout);

        let mut counter = Self {
            channel,
            config: Configuration::default(),
            state: SessionState::Connecting,
            liveness: Liveness::new(),
            options,
        };

        counter.transact(INIT_COMMAND, false).await?;
        counter.pull().await?;
        counter.state = SessionState::Ready;
        info!(config = %counter.config, "SR620 session ready");
        Ok(counter)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The last confirmed configuration.
    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// Handle to the session's liveness flag. Clearing it cancels running loops.
    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    /// Timing and progress options the session was opened with.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub(crate) fn ensure_usable(&self) -> AppResult<()> {
        match self.state {
            SessionState::Dead => Err(DaqError::SessionDead),
            SessionState::Closed => Err(DaqError::SessionClosed),
            _ => Ok(()),
        }
    }

    /// Run one channel transaction, killing the session on transport faults.
    pub(crate) async fn transact(
        &mut self,
        command: &str,
        expects_response: bool,
    ) -> AppResult<Option<Response>> {
        self.ensure_usable()?;
        match self.channel.transact(command, expects_response).await {
            Err(err) if err.is_transport() => {
                self.mark_dead(command, &err);
                Err(err)
            }
            other => other,
        }
    }

    fn mark_dead(&mut self, command: &str, err: &DaqError) {
        error!(command, error = %err, "Transport fault, session is dead");
        self.state = SessionState::Dead;
        self.liveness.cancel(format!("transport fault: {err}"));
    }

    /// Read the instrument's configuration and replace the mirror wholesale.
    ///
    /// A malformed reply leaves the mirror untouched.
    #[instrument(skip(self), err)]
    pub async fn pull(&mut self) -> AppResult<Configuration> {
        let reply = self
            .transact(STATUS_QUERY, true)
            .await?
            .ok_or_else(|| DaqError::Parse("status query returned nothing".to_string()))?;
        let config = Configuration::from_status(&reply)?;
        debug!(%config, "Pulled configuration");
        self.config = config;
        Ok(config)
    }

    /// Merge `update` over the current configuration without applying it.
    pub fn stage(&self, update: &ConfigurationUpdate) -> AppResult<Configuration> {
        self.ensure_usable()?;
        self.config.merge(update)
    }

    /// Apply a staged configuration as one composite command, wait for the
    /// instrument to settle, then confirm by pulling.
    #[instrument(skip_all, fields(staged = %staged), err)]
    pub async fn commit(&mut self, staged: Configuration) -> AppResult<Configuration> {
        self.transact(&staged.to_command(), false).await?;
        tokio::time::sleep(self.options.settle).await;
        let confirmed = self.pull().await?;
        if confirmed != staged {
            info!(requested = %staged, "Instrument adjusted the requested configuration");
        }
        info!(config = %confirmed, "Configuration committed");
        Ok(confirmed)
    }

    /// Stage and commit in one step. Unsupplied fields keep their values.
    pub async fn set_configuration(
        &mut self,
        update: &ConfigurationUpdate,
    ) -> AppResult<Configuration> {
        let staged = self.stage(update)?;
        self.commit(staged).await
    }

    /// Close the session and shut the transport down.
    ///
    /// Idempotent. Closing a dead session only records the transition.
    #[instrument(skip(self), err)]
    pub async fn close(&mut self) -> AppResult<()> {
        match self.state {
            SessionState::Closed => return Ok(()),
            SessionState::Dead => {
                self.state = SessionState::Closed;
                return Ok(());
            }
            _ => {}
        }

        self.state = SessionState::Closed;
        self.liveness.cancel("session closed");
        if let Err(err) = self.channel.shutdown().await {
            debug!(error = %err, "Transport shutdown failed");
        }
        info!("SR620 session closed");
        Ok(())
    }
}
