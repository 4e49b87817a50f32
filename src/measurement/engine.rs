//! Measurement operations on an open SR620 session.
//!
//! Loop rules shared by every multi-sample operation:
//! - the liveness flag is checked before each transaction, never during one
//! - a malformed reading is logged and skipped
//! - a transport fault ends the loop and the session
//! - the sink is flushed on every exit path

use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::data::allan::{self, AllanEstimator, AllanSeries, TauSpacing};
use crate::data::storage::MeasurementSink;
use crate::error::{AppResult, DaqError};
use crate::hardware::sr620::Sr620;
use crate::hardware::sr620_config::{ConfigurationUpdate, SampleCount};
use crate::measurement::progress::ProgressMonitor;
use crate::measurement::{Sample, Statistic};
use crate::session::SessionState;

impl Sr620 {
    /// Take one reading of `statistic`.
    ///
    /// Gated frequency readings run a progress monitor alongside the
    /// transaction.
    #[instrument(skip(self), err)]
    pub async fn measure_once(&mut self, statistic: Statistic) -> AppResult<f64> {
        let estimate = self.progress_estimate();
        self.read_value(statistic, estimate).await
    }

    /// Take `count` readings, streaming each accepted one to `sink`.
    ///
    /// Stops early, without error, if the liveness flag is cleared.
    #[instrument(skip(self, sink), err)]
    pub async fn measure_set(
        &mut self,
        statistic: Statistic,
        count: usize,
        sink: Option<&mut dyn MeasurementSink>,
    ) -> AppResult<Vec<Sample>> {
        let estimate = self.progress_estimate();
        self.collect(statistic, Some(count), estimate, sink).await
    }

    /// Take readings until the liveness flag is cleared.
    #[instrument(skip(self, sink), err)]
    pub async fn measure_unbounded(
        &mut self,
        statistic: Statistic,
        sink: Option<&mut dyn MeasurementSink>,
    ) -> AppResult<Vec<Sample>> {
        let estimate = self.progress_estimate();
        self.collect(statistic, None, estimate, sink).await
    }

    /// Allan sweep with octave-spaced averaging times.
    pub async fn allan_sweep(
        &mut self,
        samples: usize,
        estimator: AllanEstimator,
        sink: Option<&mut dyn MeasurementSink>,
    ) -> AppResult<AllanSeries> {
        self.allan_sweep_with(samples, estimator, TauSpacing::default(), sink)
            .await
    }

    /// Collect `samples` single-sample mean readings at the arming gate time
    /// and compute a deviation series from them.
    ///
    /// Forces the sample count to 1 first. Fails with a validation error if
    /// the arming mode has no fixed gate time. A cancelled sweep computes the
    /// series from whatever was collected.
    #[instrument(skip(self, sink), err)]
    pub async fn allan_sweep_with(
        &mut self,
        samples: usize,
        estimator: AllanEstimator,
        spacing: TauSpacing,
        mut sink: Option<&mut dyn MeasurementSink>,
    ) -> AppResult<AllanSeries> {
        let gate = match self.prepare_sweep(samples).await {
            Ok(gate) => gate,
            Err(err) => return abort(&mut sink, err),
        };

        info!(samples, %estimator, gate_s = gate.as_secs_f64(), "Starting Allan sweep");
        let monitor = if self.options.progress {
            ProgressMonitor::new(samples as u64, gate).spawn(self.liveness())
        } else {
            None
        };
        let collected = self.collect(Statistic::Mean, Some(samples), None, None).await;
        if let Some(monitor) = monitor {
            monitor.finish().await;
        }

        let collected = match collected {
            Ok(collected) => collected,
            Err(err) => return abort(&mut sink, err),
        };
        if collected.len() < samples {
            warn!(
                collected = collected.len(),
                requested = samples,
                "Allan sweep ended early"
            );
        }

        let readings: Vec<f64> = collected.iter().map(|s| s.value).collect();
        let series = allan::deviation_series(&readings, gate.as_secs_f64(), estimator, spacing);

        if let Some(sink) = sink {
            let written = write_series(sink, &series);
            let flushed = sink.finish();
            written?;
            flushed?;
        }

        info!(points = series.len(), "Allan sweep complete");
        Ok(series)
    }

    /// Checks run before a sweep sends anything, then the forced sample count.
    async fn prepare_sweep(&mut self, samples: usize) -> AppResult<Duration> {
        self.ensure_usable()?;
        if samples == 0 {
            return Err(DaqError::Validation(
                "an Allan sweep needs at least one sample".to_string(),
            ));
        }
        let arming = self.config.arming;
        let gate = arming.gate_time().ok_or_else(|| {
            DaqError::Validation(format!(
                "arming mode '{arming}' has no fixed gate time"
            ))
        })?;

        if self.config.sample_count != SampleCount::ONE {
            self.set_configuration(&ConfigurationUpdate::new().sample_count(1))
                .await?;
        }
        Ok(gate)
    }

    fn progress_estimate(&self) -> Option<(u64, Duration)> {
        if self.options.progress {
            self.config.progress_estimate()
        } else {
            None
        }
    }

    /// One `MEAS?` transaction, with an optional progress monitor beside it.
    async fn read_value(
        &mut self,
        statistic: Statistic,
        estimate: Option<(u64, Duration)>,
    ) -> AppResult<f64> {
        self.ensure_usable()?;
        self.state = SessionState::Measuring;

        let monitor = estimate
            .and_then(|(units, delay)| ProgressMonitor::new(units, delay).spawn(self.liveness()));
        let reply = self.transact(&statistic.command(), true).await;
        if let Some(monitor) = monitor {
            monitor.finish().await;
        }
        if self.state == SessionState::Measuring {
            self.state = SessionState::Ready;
        }

        let reply = reply?
            .ok_or_else(|| DaqError::Parse("measurement returned nothing".to_string()))?;
        reply.values().first().copied().ok_or_else(|| {
            DaqError::Parse(format!("no numeric value in reply '{}'", reply.raw()))
        })
    }

    /// Liveness-checked reading loop shared by sets, unbounded runs and sweeps.
    async fn collect(
        &mut self,
        statistic: Statistic,
        limit: Option<usize>,
        estimate: Option<(u64, Duration)>,
        mut sink: Option<&mut dyn MeasurementSink>,
    ) -> AppResult<Vec<Sample>> {
        if let Err(err) = self.ensure_usable() {
            return abort(&mut sink, err);
        }
        let begun = match sink.as_deref_mut() {
            Some(sink) => sink.begin(&["timestamp", statistic.symbol()]),
            None => Ok(()),
        };
        if let Err(err) = begun {
            return abort(&mut sink, err);
        }

        let mut samples: Vec<Sample> = Vec::with_capacity(limit.unwrap_or_default());
        let mut iteration = 0usize;
        let mut cancelled = false;
        let outcome = loop {
            if limit.is_some_and(|limit| iteration >= limit) {
                break Ok(());
            }
            if !self.liveness.is_alive() {
                info!(
                    collected = samples.len(),
                    reason = %self.liveness.reason().unwrap_or_default(),
                    "Measurement loop stopped"
                );
                cancelled = true;
                break Ok(());
            }
            iteration += 1;

            match self.read_value(statistic, estimate).await {
                Ok(value) => {
                    let sample =
                        Sample::stamp(statistic, value, samples.last().map(|s| s.timestamp));
                    if let Some(sink) = sink.as_deref_mut() {
                        if let Err(err) = sink.write_sample(&sample) {
                            break Err(err);
                        }
                    }
                    samples.push(sample);
                }
                Err(err) if err.is_fatal() => break Err(err),
                Err(err) => warn!(iteration, error = %err, "Skipping sample"),
            }
        };

        let flushed = match sink {
            Some(sink) => sink.finish(),
            None => Ok(()),
        };
        if cancelled {
            self.rearm_after_cancel();
        }
        outcome?;
        flushed?;
        Ok(samples)
    }

    /// A loop stopped by cancellation leaves a live session usable for the
    /// next call. A cancel that lands after a bounded loop has finished its
    /// count is left pending.
    fn rearm_after_cancel(&self) {
        if !self.state.is_terminal() && !self.liveness.is_alive() {
            info!(reason = %self.liveness.reason().unwrap_or_default(), "Re-arming after cancellation");
            self.liveness.rearm();
        }
    }
}

/// Flush `sink` on an abort path and hand back the original error.
fn abort<T>(sink: &mut Option<&mut dyn MeasurementSink>, err: DaqError) -> AppResult<T> {
    if let Some(sink) = sink.as_deref_mut() {
        if let Err(flush) = sink.finish() {
            warn!(error = %flush, "Sink flush failed while aborting");
        }
    }
    Err(err)
}

fn write_series(sink: &mut dyn MeasurementSink, series: &AllanSeries) -> AppResult<()> {
    sink.begin(&["tau_s", series.estimator.symbol()])?;
    for point in series.points() {
        sink.write_point(point)?;
    }
    Ok(())
}
