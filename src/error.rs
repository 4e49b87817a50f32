//! Custom error types for the library.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failures that can occur while talking to the counter.
//!
//! ## Error Hierarchy
//!
//! `DaqError` separates faults by who is responsible for them:
//!
//! - **`Transport`**: A write to or a read from the serial channel failed. The direction is
//!   recorded so callers can tell whether the command ever left the host. A transport fault
//!   is always fatal to the session that observed it.
//! - **`Parse`**: A reply arrived but could not be interpreted on a path that requires a
//!   strict structure (for example the configuration query).
//! - **`Validation`**: The caller asked for a value outside an allowed domain. Nothing was
//!   sent to the instrument.
//! - **`Decode`**: The instrument returned a code with no symbolic counterpart. This points
//!   at firmware/protocol drift rather than a caller mistake.
//! - **`SessionDead`** / **`SessionClosed`**: The session can no longer be used.
//! - **`Config`**, **`Io`**, **`Storage`**: ambient failures from settings loading, the
//!   filesystem and output sinks.
//! - **`FeatureNotEnabled`**: functionality that was not compiled in.

use std::fmt;
use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Which half of a transaction a transport fault happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportDirection {
    /// Sending the command (or draining before it).
    Write,
    /// Receiving the reply.
    Read,
}

impl fmt::Display for TransportDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write => write!(f, "write"),
            Self::Read => write!(f, "read"),
        }
    }
}

/// Every failure the crate reports. See the module docs for the taxonomy.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Serial channel failure. Fatal to the session.
    #[error("Transport {direction} failed: {source}")]
    Transport {
        /// Half of the transaction that failed.
        direction: TransportDirection,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Reply could not be interpreted.
    #[error("Malformed reply: {0}")]
    Parse(String),

    /// Caller value outside its domain. Nothing was sent.
    #[error("Invalid value: {0}")]
    Validation(String),

    /// Instrument code with no symbolic counterpart.
    #[error("Instrument returned unknown {field} code {code}")]
    Decode {
        /// Parameter the code belongs to.
        field: &'static str,
        /// Code as received.
        code: i64,
    },

    /// A transport fault already ended the session.
    #[error("Session is dead after a transport fault")]
    SessionDead,

    /// The owner closed the session.
    #[error("Session is closed")]
    SessionClosed,

    /// Settings could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Filesystem or port setup failure outside a transaction.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Output sink failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Functionality that was not compiled in.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl DaqError {
    /// Build a write-side transport fault.
    pub fn write_fault(source: std::io::Error) -> Self {
        Self::Transport {
            direction: TransportDirection::Write,
            source,
        }
    }

    /// Build a read-side transport fault.
    pub fn read_fault(source: std::io::Error) -> Self {
        Self::Transport {
            direction: TransportDirection::Read,
            source,
        }
    }

    /// True for faults raised by the serial channel itself.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// True when the session can no longer be used after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::SessionDead | Self::SessionClosed
        )
    }
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        Self::Config(Box::new(value))
    }
}
