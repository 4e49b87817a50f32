//! Session-wide state shared between the driver, its loops and observers.
//!
//! - **`SessionState`**: lifecycle of one counter connection.
//! - **`Liveness`**: the cancellation flag. The driver clears it when the
//!   session dies; any other task may clear it to stop a running loop.
//! - **`SessionOptions`**: timing knobs derived from [`Settings`](crate::config::Settings).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::config::Settings;
use crate::hardware::command_channel::DEFAULT_DRAIN_TIMEOUT;

/// Lifecycle of a counter session.
///
/// `Dead` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Initial handshake in progress.
    Connecting,
    /// Idle and usable.
    Ready,
    /// A measurement transaction is in flight.
    Measuring,
    /// A transport fault occurred.
    Dead,
    /// Closed by the owner.
    Closed,
}

impl SessionState {
    /// Dead and Closed sessions never accept another operation.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Dead | Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Measuring => "measuring",
            Self::Dead => "dead",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Shared "keep going" flag.
///
/// Clones observe the same flag. Loops and the progress monitor only read it.
#[derive(Debug, Clone)]
pub struct Liveness {
    alive: Arc<AtomicBool>,
    reason: Arc<RwLock<Option<String>>>,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    /// A fresh, alive flag.
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
            reason: Arc::new(RwLock::new(None)),
        }
    }

    /// False once anyone has cancelled.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Clear the flag. Running loops stop before their next transaction.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.alive.store(false, Ordering::SeqCst);
        if let Ok(mut r) = self.reason.write() {
            *r = Some(reason.into());
        }
    }

    /// Why the flag was last cleared.
    pub fn reason(&self) -> Option<String> {
        self.reason.read().ok().and_then(|r| r.clone())
    }

    /// Set the flag again after a cancelled loop has wound down.
    pub(crate) fn rearm(&self) {
        self.alive.store(true, Ordering::SeqCst);
        if let Ok(mut r) = self.reason.write() {
            *r = None;
        }
    }
}

/// Timing and behaviour options for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Quiet period that ends a drain.
    pub drain_timeout: Duration,
    /// Reply deadline; `None` waits as long as the transport does.
    pub response_timeout: Option<Duration>,
    /// Pause between writing a configuration and reading it back.
    pub settle: Duration,
    /// Whether measurements start progress monitors.
    pub progress: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            response_timeout: None,
            settle: Duration::from_millis(500),
            progress: true,
        }
    }
}

impl From<&Settings> for SessionOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            drain_timeout: Duration::from_millis(settings.serial.drain_timeout_ms),
            response_timeout: settings.serial.response_timeout_ms.map(Duration::from_millis),
            settle: Duration::from_millis(settings.session.settle_ms),
            progress: settings.session.progress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liveness_clones_share_the_flag() {
        let flag = Liveness::new();
        let observer = flag.clone();
        assert!(observer.is_alive());

        flag.cancel("operator abort");
        assert!(!observer.is_alive());
        assert_eq!(observer.reason().as_deref(), Some("operator abort"));

        observer.rearm();
        assert!(flag.is_alive());
        assert_eq!(flag.reason(), None);
    }

    #[test]
    fn only_dead_and_closed_are_terminal() {
        assert!(SessionState::Dead.is_terminal());
        assert!(SessionState::Closed.is_terminal());
        assert!(!SessionState::Measuring.is_terminal());
        assert_eq!(SessionState::Ready.to_string(), "ready");
    }

    #[test]
    fn options_follow_settings() {
        let mut settings = Settings::default();
        settings.serial.response_timeout_ms = Some(2_000);
        settings.session.settle_ms = 10;
        let options = SessionOptions::from(&settings);
        assert_eq!(options.response_timeout, Some(Duration::from_secs(2)));
        assert_eq!(options.settle, Duration::from_millis(10));
        assert_eq!(options.drain_timeout, DEFAULT_DRAIN_TIMEOUT);
    }
}
