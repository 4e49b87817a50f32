//! Allan deviation estimators for frequency stability analysis.
//!
//! Input is a run of fractional (or absolute) frequency readings `y[i]` taken
//! back to back at a fixed gate time `tau0`. They are integrated into phase
//! data `x` (with `x[0] = 0`, `x[i+1] = x[i] + y[i] * tau0`) and the deviation
//! is evaluated at averaging times `tau = m * tau0`:
//!
//! - **Classic** (`adev`): non-overlapping second differences of `x`
//! - **Overlapping** (`oadev`): every second difference, stride 1
//! - **Modified** (`mdev`): second differences of phase averaged over `m`
//!
//! An averaging factor that would need more data than supplied produces no
//! point. Points are returned in increasing tau order.
//!
//! # Example
//!
//! ```
//! use sr620_daq::data::allan::{deviation_series, AllanEstimator, TauSpacing};
//!
//! let readings = [10.0e6, 10.0e6 + 0.002, 10.0e6 - 0.001, 10.0e6 + 0.001, 10.0e6];
//! let series = deviation_series(&readings, 1.0, AllanEstimator::Overlapping, TauSpacing::Octave);
//! assert_eq!(series.points()[0].tau, 1.0);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DaqError;

/// Which deviation to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AllanEstimator {
    /// Non-overlapping Allan deviation.
    #[serde(rename = "adev")]
    Classic,
    /// Overlapping Allan deviation.
    #[default]
    #[serde(rename = "oadev")]
    Overlapping,
    /// Modified Allan deviation.
    #[serde(rename = "mdev")]
    Modified,
}

impl AllanEstimator {
    /// Every estimator.
    pub const ALL: [Self; 3] = [Self::Classic, Self::Overlapping, Self::Modified];

    /// Short name used in headers and on the command line.
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Classic => "adev",
            Self::Overlapping => "oadev",
            Self::Modified => "mdev",
        }
    }

    /// Deviation at averaging factor `m`, with the number of terms used.
    fn evaluate(self, phase: &[f64], m: usize, tau0: f64) -> Option<(f64, usize)> {
        match self {
            Self::Classic => second_difference(phase, m, m, tau0),
            Self::Overlapping => second_difference(phase, m, 1, tau0),
            Self::Modified => modified(phase, m, tau0),
        }
    }
}

impl fmt::Display for AllanEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for AllanEstimator {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|e| e.symbol().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                DaqError::Validation(format!(
                    "unknown estimator '{s}' (expected adev, oadev or mdev)"
                ))
            })
    }
}

/// Which averaging factors to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TauSpacing {
    /// m = 1, 2, 4, 8, ...
    #[default]
    Octave,
    /// m = 1, 2, 4, 10, 20, 40, ...
    Decade,
    /// Every m.
    All,
}

impl TauSpacing {
    /// Candidate averaging factors up to and including `max`.
    pub fn factors(self, max: usize) -> Vec<usize> {
        match self {
            Self::All => (1..=max).collect(),
            Self::Octave => std::iter::successors(Some(1usize), |m| m.checked_mul(2))
                .take_while(|&m| m <= max)
                .collect(),
            Self::Decade => std::iter::successors(Some(1usize), |d| d.checked_mul(10))
                .take_while(|&d| d <= max)
                .flat_map(|d| [d, 2 * d, 4 * d])
                .filter(|&m| m <= max)
                .collect(),
        }
    }
}

impl fmt::Display for TauSpacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Octave => "octave",
            Self::Decade => "decade",
            Self::All => "all",
        })
    }
}

impl FromStr for TauSpacing {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "octave" => Ok(Self::Octave),
            "decade" => Ok(Self::Decade),
            "all" => Ok(Self::All),
            other => Err(DaqError::Validation(format!(
                "unknown tau spacing '{other}' (expected octave, decade or all)"
            ))),
        }
    }
}

/// One point of a deviation series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllanPoint {
    /// Averaging time in seconds.
    pub tau: f64,
    /// Estimated deviation, dimensionless.
    pub deviation: f64,
    /// `deviation / sqrt(terms)`.
    pub error: f64,
    /// Number of difference terms that went into the estimate.
    pub terms: usize,
}

/// Deviation as a function of averaging time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllanSeries {
    /// Estimator the points were computed with.
    pub estimator: AllanEstimator,
    /// Base gate time in seconds.
    pub tau0: f64,
    points: Vec<AllanPoint>,
}

impl AllanSeries {
    /// Points in increasing `tau`.
    pub fn points(&self) -> &[AllanPoint] {
        &self.points
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when too few samples gave no point at all.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Deviation at `tau`, if the series has a point there.
    pub fn deviation_at(&self, tau: f64) -> Option<f64> {
        let tolerance = self.tau0 * 1e-9;
        self.points
            .iter()
            .find(|p| (p.tau - tau).abs() <= tolerance)
            .map(|p| p.deviation)
    }
}

/// Integrate frequency readings into phase, starting at zero.
pub fn phase_from_frequency(readings: &[f64], tau0: f64) -> Vec<f64> {
    let mut phase = Vec::with_capacity(readings.len() + 1);
    phase.push(0.0);
    let mut acc = 0.0;
    for y in readings {
        acc += y * tau0;
        phase.push(acc);
    }
    phase
}

/// Compute a deviation series from readings taken every `tau0` seconds.
pub fn deviation_series(
    readings: &[f64],
    tau0: f64,
    estimator: AllanEstimator,
    spacing: TauSpacing,
) -> AllanSeries {
    let phase = phase_from_frequency(readings, tau0);
    let points = if tau0 > 0.0 && readings.len() > 1 {
        spacing
            .factors(readings.len())
            .into_iter()
            .filter_map(|m| {
                estimator
                    .evaluate(&phase, m, tau0)
                    .map(|(deviation, terms)| AllanPoint {
                        tau: m as f64 * tau0,
                        deviation,
                        error: deviation / (terms as f64).sqrt(),
                        terms,
                    })
            })
            .collect()
    } else {
        Vec::new()
    };

    AllanSeries {
        estimator,
        tau0,
        points,
    }
}

/// Second differences `x[i+2m] - 2x[i+m] + x[i]` for `i = 0, stride, 2*stride, ...`.
fn second_difference(phase: &[f64], m: usize, stride: usize, tau0: f64) -> Option<(f64, usize)> {
    let span = 2 * m;
    if phase.len() <= span {
        return None;
    }

    let mut sum = 0.0;
    let mut terms = 0usize;
    for i in (0..phase.len() - span).step_by(stride) {
        let d = phase[i + span] - 2.0 * phase[i + m] + phase[i];
        sum += d * d;
        terms += 1;
    }

    let tau = m as f64 * tau0;
    Some(((sum / (2.0 * terms as f64)).sqrt() / tau, terms))
}

/// Modified Allan deviation using a running sum over windows of `m` phase points.
fn modified(phase: &[f64], m: usize, tau0: f64) -> Option<(f64, usize)> {
    if phase.len() < 3 * m {
        return None;
    }

    let mut v: f64 = (0..m)
        .map(|j| phase[j + 2 * m] - 2.0 * phase[j + m] + phase[j])
        .sum();
    let mut sum = v * v;
    let mut terms = 1usize;

    for i in 0..phase.len() - 3 * m {
        v += phase[i + 3 * m] - 3.0 * phase[i + 2 * m] + 3.0 * phase[i + m] - phase[i];
        sum += v * v;
        terms += 1;
    }

    let tau = m as f64 * tau0;
    let m = m as f64;
    Some(((sum / (2.0 * m * m * tau * tau * terms as f64)).sqrt(), terms))
}
