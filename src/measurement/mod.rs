//! Measurement orchestration.
//!
//! - [`engine`]: single readings, fixed and open-ended sets, and the Allan
//!   sweep, implemented on [`Sr620`](crate::hardware::sr620::Sr620)
//! - [`progress`]: the advisory progress monitor that runs beside long readings

pub mod engine;
pub mod progress;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codes::coded_enum;

coded_enum! {
    /// Statistic requested from `MEAS?`.
    pub enum Statistic: "statistic" {
        /// Average of the sample set.
        Mean = 0 => "mean",
        /// Jitter, in the configured jitter kind.
        Jitter = 1 => "jitter",
        /// Largest sample.
        Max = 2 => "max",
        /// Smallest sample.
        Min = 3 => "min",
    }
}

impl Statistic {
    /// The measurement command for this statistic.
    pub fn command(self) -> String {
        format!("STOP;AUTM 0;MEAS? {}", self.code())
    }
}

/// One accepted reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Host clock at receipt, never earlier than the previous sample's.
    pub timestamp: DateTime<Utc>,
    /// Statistic that was requested.
    pub statistic: Statistic,
    /// Reading in the unit of the current mode.
    pub value: f64,
}

impl Sample {
    /// Stamp a reading with the current time, clamped to `after`.
    pub fn stamp(statistic: Statistic, value: f64, after: Option<DateTime<Utc>>) -> Self {
        let now = Utc::now();
        let timestamp = match after {
            Some(previous) if previous > now => previous,
            _ => now,
        };
        Self {
            timestamp,
            statistic,
            value,
        }
    }
}
