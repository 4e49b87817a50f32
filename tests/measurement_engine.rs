//! Measurement loops and the Allan sweep against the simulator.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{connect, connect_failing_after, fast_options, SimulatedCounter};
use sr620_daq::data::allan::{AllanEstimator, TauSpacing};
use sr620_daq::data::storage::{CsvSink, MeasurementSink, MemorySink};
use sr620_daq::error::AppResult;
use sr620_daq::measurement::Statistic;
use sr620_daq::session::SessionState;
use sr620_daq::DaqError;

#[tokio::test]
async fn test_measure_once_returns_the_reading() {
    let sim = SimulatedCounter::default().with_readings(["9999999.87"]);
    let (mut counter, shared, _task) = connect(sim, fast_options()).await;

    let value = counter.measure_once(Statistic::Max).await.unwrap();

    assert!((value - 9_999_999.87).abs() < 1e-6);
    assert_eq!(counter.state(), SessionState::Ready);
    assert_eq!(shared.lock().unwrap().commands[2], "STOP;AUTM 0;MEAS? 2");
}

#[tokio::test]
async fn test_measure_once_with_progress_monitor() {
    let mut options = fast_options();
    options.progress = true;
    let sim = SimulatedCounter {
        arming: 3,
        size_index: 3,
        ..SimulatedCounter::default()
    }
    .with_readings(["5.0"]);
    let (mut counter, _shared, _task) = connect(sim, options).await;

    assert_eq!(counter.measure_once(Statistic::Mean).await.unwrap(), 5.0);
    assert!(counter.liveness().is_alive());
}

#[tokio::test]
async fn test_garbled_reading_fails_only_the_call() {
    let sim = SimulatedCounter::default().with_readings(["OVFL", "1.5"]);
    let (mut counter, _shared, _task) = connect(sim, fast_options()).await;

    let err = counter.measure_once(Statistic::Mean).await.unwrap_err();
    assert!(matches!(err, DaqError::Parse(_)));
    assert_eq!(counter.state(), SessionState::Ready);
    assert_eq!(counter.measure_once(Statistic::Mean).await.unwrap(), 1.5);
}

#[tokio::test]
async fn test_measure_set_streams_every_sample() {
    let sim = SimulatedCounter::default().with_readings(["1.0", "2.0", "3.0", "4.0", "5.0"]);
    let (mut counter, _shared, _task) = connect(sim, fast_options()).await;
    let mut sink = MemorySink::new();

    let samples = counter
        .measure_set(Statistic::Mean, 5, Some(&mut sink))
        .await
        .unwrap();

    assert_eq!(samples.len(), 5);
    assert_eq!(sink.header, vec!["timestamp", "mean"]);
    assert_eq!(sink.rows.len(), 5);
    assert_eq!(sink.finished, 1);
    assert!(samples.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    assert_eq!(sink.rows[4][1], "5");
}

#[tokio::test]
async fn test_measure_set_skips_malformed_readings() {
    let sim = SimulatedCounter::default().with_readings(["1.0", "garbage", "3.0"]);
    let (mut counter, _shared, _task) = connect(sim, fast_options()).await;
    let mut sink = MemorySink::new();

    let samples = counter
        .measure_set(Statistic::Jitter, 3, Some(&mut sink))
        .await
        .unwrap();

    assert_eq!(samples.len(), 2);
    assert_eq!(sink.rows.len(), 2);
    assert_eq!(sink.header[1], "jitter");
    assert_eq!(counter.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_measure_set_writes_csv() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("series.csv");
    let sim = SimulatedCounter::default().with_readings(["10.0", "11.0", "12.0"]);
    let (mut counter, _shared, _task) = connect(sim, fast_options()).await;

    let mut sink = CsvSink::create(&path).unwrap();
    counter
        .measure_set(Statistic::Mean, 3, Some(&mut sink))
        .await
        .unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "timestamp,mean");
    assert!(lines[3].ends_with(",12"));
}

#[tokio::test]
async fn test_cancelling_unbounded_stops_after_in_flight_reading() {
    let (mut counter, shared, _task) = connect(SimulatedCounter::default(), fast_options()).await;
    shared.lock().unwrap().cancel_on_measurement = Some((3, counter.liveness()));
    let mut sink = MemorySink::new();

    let samples = counter
        .measure_unbounded(Statistic::Mean, Some(&mut sink))
        .await
        .unwrap();

    assert_eq!(samples.len(), 3);
    assert_eq!(sink.rows.len(), 3);
    assert_eq!(sink.finished, 1);
    assert_eq!(shared.lock().unwrap().count_commands("MEAS?"), 3);
    // The session stays usable for the next run.
    assert!(counter.liveness().is_alive());
    assert_eq!(counter.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_cancelled_set_stops_early_without_error() {
    let (mut counter, shared, _task) = connect(SimulatedCounter::default(), fast_options()).await;
    shared.lock().unwrap().cancel_on_measurement = Some((2, counter.liveness()));

    let samples = counter.measure_set(Statistic::Mean, 10, None).await.unwrap();
    assert_eq!(samples.len(), 2);
}

#[tokio::test]
async fn test_cancel_after_last_sample_stays_pending() {
    let (mut counter, shared, _task) = connect(SimulatedCounter::default(), fast_options()).await;
    shared.lock().unwrap().cancel_on_measurement = Some((3, counter.liveness()));

    let samples = counter.measure_set(Statistic::Mean, 3, None).await.unwrap();
    assert_eq!(samples.len(), 3);
    assert!(!counter.liveness().is_alive());

    // The next loop honours the cancel before sending anything.
    let samples = counter.measure_set(Statistic::Mean, 3, None).await.unwrap();
    assert!(samples.is_empty());
    assert_eq!(shared.lock().unwrap().count_commands("MEAS?"), 3);
    assert!(counter.liveness().is_alive());
}

#[tokio::test]
async fn test_transport_fault_mid_set_keeps_written_rows() {
    let sim = SimulatedCounter::default().with_readings(["1.0", "2.0", "3.0"]);
    // Connect uses two writes, so the third MEAS? write fails.
    let (mut counter, shared, _task) = connect_failing_after(sim, fast_options(), 4).await;
    let mut sink = MemorySink::new();

    let err = counter
        .measure_set(Statistic::Mean, 5, Some(&mut sink))
        .await
        .unwrap_err();

    assert!(err.is_transport());
    assert_eq!(sink.rows.len(), 2);
    assert_eq!(sink.finished, 1);
    assert_eq!(counter.state(), SessionState::Dead);
    assert!(!counter.liveness().is_alive());
    assert_eq!(shared.lock().unwrap().count_commands("MEAS?"), 2);
}

#[tokio::test]
async fn test_early_aborts_finish_the_sink() {
    let sim = SimulatedCounter {
        arming: 0,
        ..SimulatedCounter::default()
    };
    let (mut counter, shared, _task) = connect(sim, fast_options()).await;
    let mut sink = MemorySink::new();

    let err = counter
        .allan_sweep(10, AllanEstimator::Classic, Some(&mut sink))
        .await
        .unwrap_err();
    assert!(matches!(err, DaqError::Validation(_)));
    assert_eq!(sink.finished, 1);

    let err = counter
        .allan_sweep(0, AllanEstimator::Classic, Some(&mut sink))
        .await
        .unwrap_err();
    assert!(matches!(err, DaqError::Validation(_)));
    assert_eq!(sink.finished, 2);

    counter.close().await.unwrap();
    let err = counter
        .measure_set(Statistic::Mean, 3, Some(&mut sink))
        .await
        .unwrap_err();
    assert!(matches!(err, DaqError::SessionClosed));
    assert_eq!(sink.finished, 3);

    assert!(sink.rows.is_empty());
    assert_eq!(shared.lock().unwrap().commands.len(), 2);
}

#[tokio::test]
async fn test_sweep_setup_fault_finishes_the_sink() {
    let sim = SimulatedCounter {
        size_index: 2,
        ..SimulatedCounter::default()
    };
    // The forced SIZE 1 write is the first to fail.
    let (mut counter, _shared, _task) = connect_failing_after(sim, fast_options(), 2).await;
    let mut sink = MemorySink::new();

    let err = counter
        .allan_sweep(3, AllanEstimator::Overlapping, Some(&mut sink))
        .await
        .unwrap_err();

    assert!(err.is_transport());
    assert_eq!(sink.finished, 1);
    assert!(sink.header.is_empty());
    assert_eq!(counter.state(), SessionState::Dead);
}

/// Accepts rows but cannot flush.
struct UnflushableSink;

impl MeasurementSink for UnflushableSink {
    fn begin(&mut self, _header: &[&str]) -> AppResult<()> {
        Ok(())
    }

    fn write_row(&mut self, _row: &[String]) -> AppResult<()> {
        Ok(())
    }

    fn finish(&mut self) -> AppResult<()> {
        Err(DaqError::Storage("disk full".to_string()))
    }
}

#[tokio::test]
async fn test_flush_failure_keeps_the_abort_error() {
    let (mut counter, _shared, _task) = connect(SimulatedCounter::default(), fast_options()).await;

    let err = counter
        .allan_sweep(0, AllanEstimator::Overlapping, Some(&mut UnflushableSink))
        .await
        .unwrap_err();

    assert!(matches!(err, DaqError::Validation(_)));
}

#[tokio::test]
async fn test_allan_sweep_on_three_constant_samples() {
    let sim = SimulatedCounter {
        arming: 5,
        size_index: 2,
        ..SimulatedCounter::default()
    }
    .with_readings(["1", "1", "1"]);
    let (mut counter, shared, _task) = connect(sim, fast_options()).await;
    let mut sink = MemorySink::new();

    let series = counter
        .allan_sweep(3, AllanEstimator::Overlapping, Some(&mut sink))
        .await
        .unwrap();

    assert_eq!(series.len(), 1);
    let point = series.points()[0];
    assert!((point.tau - 1.0).abs() < 1e-12);
    assert!(point.deviation.abs() < 1e-12);
    assert_eq!(series.deviation_at(2.0), None);

    assert_eq!(sink.header, vec!["tau_s", "oadev"]);
    assert_eq!(sink.rows, vec![vec!["1".to_string(), "0".to_string()]]);
    assert_eq!(counter.configuration().sample_count.get(), 1);

    let sim = shared.lock().unwrap();
    assert!(sim.commands.iter().any(|c| c.contains("SIZE 1;")));
    assert_eq!(sim.count_commands("MEAS? 0"), 3);
}

#[tokio::test]
async fn test_allan_sweep_at_short_gate() {
    let readings: Vec<String> = (0..16).map(|i| format!("{}", 1.0e7 + f64::from(i % 4))).collect();
    let sim = SimulatedCounter {
        arming: 4,
        ..SimulatedCounter::default()
    }
    .with_readings(readings);
    let (mut counter, _shared, _task) = connect(sim, fast_options()).await;

    let series = counter
        .allan_sweep_with(16, AllanEstimator::Modified, TauSpacing::All, None)
        .await
        .unwrap();

    assert!((series.tau0 - 0.1).abs() < 1e-12);
    assert!(series.points().windows(2).all(|w| w[0].tau < w[1].tau));
    // mdev needs 3m phase points out of 17.
    assert_eq!(series.len(), 5);
}

#[tokio::test]
async fn test_allan_sweep_needs_a_gate_time() {
    let sim = SimulatedCounter {
        arming: 0,
        ..SimulatedCounter::default()
    };
    let (mut counter, shared, _task) = connect(sim, fast_options()).await;

    let err = counter
        .allan_sweep(10, AllanEstimator::Classic, None)
        .await
        .unwrap_err();

    assert!(matches!(err, DaqError::Validation(_)));
    assert_eq!(shared.lock().unwrap().commands.len(), 2);
}
