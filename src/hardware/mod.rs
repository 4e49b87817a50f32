//! Counter hardware access.
//!
//! - [`serial`]: the byte transport and port opening
//! - [`command_channel`]: framed request/response transactions
//! - [`sr620_config`]: the parameter set and its register encoding
//! - [`sr620`]: the session driver
//! - [`mock_serial`]: in-memory transport for tests and simulations

pub mod command_channel;
pub mod mock_serial;
pub mod serial;
pub mod sr620;
pub mod sr620_config;

pub use command_channel::{CommandChannel, Response};
pub use sr620::Sr620;
pub use sr620_config::{Configuration, ConfigurationUpdate, SampleCount};
