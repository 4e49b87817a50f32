//! # SR620 Counter Library
//!
//! Control and measurement library for the Stanford Research SR620 universal
//! time interval counter over its RS-232 port. The `sr620` binary is a thin
//! command-line front end over the same API.
//!
//! ## Crate Structure
//!
//! - **`hardware`**: the serial transport, the framed command channel, the
//!   counter's parameter set with its register encoding, and the `Sr620`
//!   session driver. Also carries an in-memory serial pair for tests.
//! - **`measurement`**: single readings, fixed and open-ended sets, the Allan
//!   sweep, and the progress monitor that runs beside long readings.
//! - **`data`**: Allan deviation estimators and CSV/in-memory output sinks.
//! - **`session`**: session lifecycle, the shared liveness (cancellation)
//!   flag and timing options.
//! - **`config`**: settings loaded with Figment from TOML and the environment.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`error`**: the `DaqError` taxonomy.

pub(crate) mod codes;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod measurement;
pub mod session;

pub use error::{AppResult, DaqError};
pub use hardware::Sr620;
