//! SR620 configuration record and its register encoding.
//!
//! The counter exposes seven front-panel parameters. On the way in they are
//! written as a single composite command (`MODE m;SRCE s;...`); on the way out
//! they are read back from the `SETP?` status reply, where most values sit in
//! positional fields and three of them are packed into the status word.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codes::coded_enum;
use crate::error::{AppResult, DaqError};
use crate::hardware::command_channel::Response;

/// Query returning the full parameter set.
pub const STATUS_QUERY: &str = "SETP?";

/// Number of fields in a well-formed status reply.
pub const STATUS_FIELDS: usize = 8;

const MODE_FIELD: usize = 0;
const SOURCE_FIELD: usize = 1;
const ARMING_FIELD: usize = 2;
const SIZE_FIELD: usize = 4;
const STATUS_WORD_FIELD: usize = 7;

/// Status word bit holding the jitter kind (set = Allan).
pub const JITTER_BIT: u32 = 5;
/// Status word bit holding the clock source (set = external).
pub const CLOCK_SOURCE_BIT: u32 = 6;
/// Status word bit holding the clock frequency (set = 5 MHz).
pub const CLOCK_FREQUENCY_BIT: u32 = 7;

coded_enum! {
    /// Measurement mode.
    pub enum Mode: "mode" {
        /// Time interval.
        Time = 0 => "time",
        /// Pulse width.
        Width = 1 => "width",
        /// Frequency ratio.
        Ratio = 2 => "ratio",
        /// Frequency.
        Frequency = 3 => "freq",
        /// Period.
        Period = 4 => "period",
        /// Phase.
        Phase = 5 => "phase",
        /// Event count.
        Count = 6 => "count",
    }
}

coded_enum! {
    /// Input source.
    pub enum Source: "source" {
        /// Channel A.
        A = 0 => "A",
        /// Channel B.
        B = 1 => "B",
        /// Reference input.
        Reference = 2 => "REF",
        /// A/B ratio.
        Ratio = 3 => "RATIO",
    }
}

coded_enum! {
    /// How the instrument reports jitter.
    pub enum JitterKind: "jitter" {
        /// Standard deviation.
        StandardDeviation = 0 => "STD",
        /// Allan deviation.
        Allan = 1 => "ALL",
    }
}

coded_enum! {
    /// Arming mode. The gated modes fix the measurement gate time.
    pub enum Arming: "arming" {
        /// Time interval, either sign.
        PlusMinusTime = 0 => "+-time",
        /// Positive time intervals only.
        PlusTime = 1 => "+time",
        /// One period of the input.
        OnePeriod = 2 => "1period",
        /// 10 ms gate.
        Gate10ms = 3 => "0.01s",
        /// 100 ms gate.
        Gate100ms = 4 => "0.1s",
        /// 1 s gate.
        Gate1s = 5 => "1s",
        /// Externally armed time interval, either sign.
        ExternalPlusMinusTime = 6 => "ext+-time",
        /// Externally armed positive time intervals.
        ExternalPlusTime = 7 => "ext+time",
        /// External arm with holdoff.
        ExternalHoldoff = 8 => "extholdoff",
        /// Externally armed single period.
        ExternalOnePeriod = 9 => "ext1period",
        /// Externally triggered 10 ms gate.
        ExternalGate10ms = 10 => "ext0.01s",
        /// Externally triggered 100 ms gate.
        ExternalGate100ms = 11 => "ext0.1s",
        /// Externally triggered 1 s gate.
        ExternalGate1s = 12 => "ext1s",
    }
}

coded_enum! {
    /// Timebase selection.
    pub enum ClockSource: "clock" {
        /// Internal oscillator.
        Internal = 0 => "int",
        /// External reference.
        External = 1 => "ext",
    }
}

coded_enum! {
    /// Frequency of the external timebase.
    pub enum ClockFrequency: "clock frequency" {
        /// 10 MHz.
        TenMhz = 0 => "10mhz",
        /// 5 MHz.
        FiveMhz = 1 => "5mhz",
    }
}

impl Arming {
    /// Gate time implied by this arming mode, if it has one.
    pub const fn gate_time(self) -> Option<Duration> {
        match self {
            Self::Gate10ms | Self::ExternalGate10ms => Some(Duration::from_millis(10)),
            Self::Gate100ms | Self::ExternalGate100ms => Some(Duration::from_millis(100)),
            Self::Gate1s | Self::ExternalGate1s => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

/// Sample sizes accepted by the `SIZE` command, in table order.
pub const SAMPLE_COUNTS: [u32; 21] = [
    1, 2, 5, 10, 20, 50, 100, 200, 500, 1_000, 2_000, 5_000, 10_000, 20_000, 50_000, 100_000,
    200_000, 500_000, 1_000_000, 2_000_000, 5_000_000,
];

/// Number of samples the instrument averages per reading.
///
/// Always one of [`SAMPLE_COUNTS`]. The wire uses the value when writing and
/// the table index when reading back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SampleCount(u32);

impl SampleCount {
    /// A single sample per reading.
    pub const ONE: Self = Self(1);

    /// Validate a raw sample size.
    pub fn new(value: u32) -> AppResult<Self> {
        if SAMPLE_COUNTS.contains(&value) {
            Ok(Self(value))
        } else {
            Err(DaqError::Validation(format!(
                "sample count {value} is not one of 1, 2, 5 x 10^0..10^6"
            )))
        }
    }

    /// Validate a sample size given as a float, rejecting fractional values.
    pub fn from_f64(value: f64) -> AppResult<Self> {
        if !value.is_finite() || value.fract() != 0.0 || value < 1.0 || value > f64::from(u32::MAX)
        {
            return Err(DaqError::Validation(format!(
                "sample count {value} is not a supported integer size"
            )));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let whole = value as u32;
        Self::new(whole)
    }

    /// Decode the table index reported in the status reply.
    pub fn from_index(index: i64) -> AppResult<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| SAMPLE_COUNTS.get(i))
            .map(|&value| Self(value))
            .ok_or(DaqError::Decode {
                field: "sample count",
                code: index,
            })
    }

    /// Position of this size in [`SAMPLE_COUNTS`].
    pub fn index(self) -> usize {
        SAMPLE_COUNTS
            .iter()
            .position(|&v| v == self.0)
            .unwrap_or_default()
    }

    /// Raw sample size.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl Default for SampleCount {
    fn default() -> Self {
        Self::ONE
    }
}

impl TryFrom<u32> for SampleCount {
    type Error = DaqError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<f64> for SampleCount {
    type Error = DaqError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::from_f64(value)
    }
}

impl From<SampleCount> for u32 {
    fn from(value: SampleCount) -> Self {
        value.0
    }
}

impl FromStr for SampleCount {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: f64 = s
            .trim()
            .parse()
            .map_err(|_| DaqError::Validation(format!("sample count '{s}' is not a number")))?;
        Self::from_f64(value)
    }
}

impl fmt::Display for SampleCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Full instrument parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Measurement mode.
    pub mode: Mode,
    /// Input source.
    pub source: Source,
    /// Jitter kind.
    pub jitter: JitterKind,
    /// Arming mode.
    pub arming: Arming,
    /// Readings averaged per `MEAS?` reply.
    pub sample_count: SampleCount,
    /// Timebase source.
    pub clock: ClockSource,
    /// Only meaningful with an external clock.
    pub clock_frequency: ClockFrequency,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            mode: Mode::Frequency,
            source: Source::A,
            jitter: JitterKind::Allan,
            arming: Arming::Gate1s,
            sample_count: SampleCount::ONE,
            clock: ClockSource::Internal,
            clock_frequency: ClockFrequency::TenMhz,
        }
    }
}

impl Configuration {
    /// Decode a `SETP?` reply.
    ///
    /// The reply must carry all eight fields; every code must map to a known
    /// symbol.
    pub fn from_status(reply: &Response) -> AppResult<Self> {
        if reply.len() < STATUS_FIELDS {
            return Err(DaqError::Parse(format!(
                "status reply has {} fields, expected {STATUS_FIELDS}: '{}'",
                reply.len(),
                reply.raw()
            )));
        }

        Ok(Self {
            mode: Mode::from_code(reply.int(MODE_FIELD)?)?,
            source: Source::from_code(reply.int(SOURCE_FIELD)?)?,
            arming: Arming::from_code(reply.int(ARMING_FIELD)?)?,
            sample_count: SampleCount::from_index(reply.int(SIZE_FIELD)?)?,
            jitter: JitterKind::from_code(i64::from(reply.bit(STATUS_WORD_FIELD, JITTER_BIT)?))?,
            clock: ClockSource::from_code(i64::from(
                reply.bit(STATUS_WORD_FIELD, CLOCK_SOURCE_BIT)?,
            ))?,
            clock_frequency: ClockFrequency::from_code(i64::from(
                reply.bit(STATUS_WORD_FIELD, CLOCK_FREQUENCY_BIT)?,
            ))?,
        })
    }

    /// Serialize every field into one composite command.
    pub fn to_command(&self) -> String {
        format!(
            "MODE {};SRCE {};JTTR {};ARMM {};SIZE {};CLCK {};CLKF {}",
            self.mode.code(),
            self.source.code(),
            self.jitter.code(),
            self.arming.code(),
            self.sample_count.get(),
            self.clock.code(),
            self.clock_frequency.code(),
        )
    }

    /// Overlay the supplied fields of `update` onto a copy of `self`.
    pub fn merge(&self, update: &ConfigurationUpdate) -> AppResult<Self> {
        let sample_count = match update.sample_count {
            Some(raw) => SampleCount::new(raw)?,
            None => self.sample_count,
        };
        Ok(Self {
            mode: update.mode.unwrap_or(self.mode),
            source: update.source.unwrap_or(self.source),
            jitter: update.jitter.unwrap_or(self.jitter),
            arming: update.arming.unwrap_or(self.arming),
            sample_count,
            clock: update.clock.unwrap_or(self.clock),
            clock_frequency: update.clock_frequency.unwrap_or(self.clock_frequency),
        })
    }

    /// Gate time fixed by the arming mode.
    pub fn gate_time(&self) -> Option<Duration> {
        self.arming.gate_time()
    }

    /// Units and unit delay for a progress estimate of one reading.
    ///
    /// Only frequency readings with a gated arming mode have a predictable
    /// duration.
    pub fn progress_estimate(&self) -> Option<(u64, Duration)> {
        if self.mode != Mode::Frequency {
            return None;
        }
        self.gate_time()
            .map(|gate| (u64::from(self.sample_count.get()), gate))
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mode={} source={} jitter={} arming={} size={} clock={} clockfr={}",
            self.mode,
            self.source,
            self.jitter,
            self.arming,
            self.sample_count,
            self.clock,
            self.clock_frequency
        )
    }
}

/// Partial configuration. Unset fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigurationUpdate {
    /// Measurement mode.
    pub mode: Option<Mode>,
    /// Input source.
    pub source: Option<Source>,
    /// Jitter kind.
    pub jitter: Option<JitterKind>,
    /// Arming mode.
    pub arming: Option<Arming>,
    /// Validated against [`SAMPLE_COUNTS`] when merged.
    pub sample_count: Option<u32>,
    /// Timebase source.
    pub clock: Option<ClockSource>,
    /// External timebase frequency.
    pub clock_frequency: Option<ClockFrequency>,
}

impl ConfigurationUpdate {
    /// Empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the measurement mode.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set the input source.
    pub fn source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the jitter kind.
    pub fn jitter(mut self, jitter: JitterKind) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Set the arming mode.
    pub fn arming(mut self, arming: Arming) -> Self {
        self.arming = Some(arming);
        self
    }

    /// Set the sample count. Checked when the update is staged.
    pub fn sample_count(mut self, sample_count: u32) -> Self {
        self.sample_count = Some(sample_count);
        self
    }

    /// Set the timebase source.
    pub fn clock(mut self, clock: ClockSource) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the external timebase frequency.
    pub fn clock_frequency(mut self, clock_frequency: ClockFrequency) -> Self {
        self.clock_frequency = Some(clock_frequency);
        self
    }

    /// True when no field is supplied.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
