//! SR620 simulator for integration tests.
//!
//! Runs on the device side of a `mock_serial` pair, answers `SETP?` and
//! `MEAS?` from its own register file, applies `MODE`/`SRCE`/... writes, and
//! records every command it receives.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sr620_daq::hardware::mock_serial::{self, MockDeviceHarness};
use sr620_daq::hardware::sr620_config::SAMPLE_COUNTS;
use sr620_daq::session::{Liveness, SessionOptions};
use sr620_daq::Sr620;
use tokio::task::JoinHandle;

/// Register file and scripted behaviour of the simulated counter.
#[derive(Debug, Clone)]
pub struct SimulatedCounter {
    pub mode: i64,
    pub source: i64,
    pub arming: i64,
    pub size_index: usize,
    pub jitter: i64,
    pub clock: i64,
    pub clock_frequency: i64,
    /// Replies to `MEAS?`, consumed in order.
    pub readings: VecDeque<String>,
    /// Reply once `readings` is exhausted.
    pub default_reading: String,
    /// Replaces the computed `SETP?` reply when set.
    pub status_override: Option<String>,
    /// Clear this flag while answering the given (1-based) measurement.
    pub cancel_on_measurement: Option<(usize, Liveness)>,
    pub commands: Vec<String>,
    pub measurements: usize,
}

impl Default for SimulatedCounter {
    fn default() -> Self {
        Self {
            mode: 3,
            source: 0,
            arming: 5,
            size_index: 0,
            jitter: 1,
            clock: 0,
            clock_frequency: 0,
            readings: VecDeque::new(),
            default_reading: "10000000.0".to_string(),
            status_override: None,
            cancel_on_measurement: None,
            commands: Vec::new(),
            measurements: 0,
        }
    }
}

impl SimulatedCounter {
    pub fn with_readings<I, S>(mut self, readings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.readings = readings.into_iter().map(Into::into).collect();
        self
    }

    pub fn status_reply(&self) -> String {
        if let Some(raw) = &self.status_override {
            return raw.clone();
        }
        let word = (self.jitter << 5) | (self.clock << 6) | (self.clock_frequency << 7);
        format!(
            "{},{},{},0,{},0,0,{}",
            self.mode, self.source, self.arming, self.size_index, word
        )
    }

    /// Commands containing `needle`.
    pub fn count_commands(&self, needle: &str) -> usize {
        self.commands.iter().filter(|c| c.contains(needle)).count()
    }

    fn apply(&mut self, key: &str, value: &str) {
        let code: i64 = value.parse().unwrap_or(-1);
        match key {
            "MODE" => self.mode = code,
            "SRCE" => self.source = code,
            "JTTR" => self.jitter = code,
            "ARMM" => self.arming = code,
            "CLCK" => self.clock = code,
            "CLKF" => self.clock_frequency = code,
            "SIZE" => {
                if let Some(index) = SAMPLE_COUNTS.iter().position(|&v| i64::from(v) == code) {
                    self.size_index = index;
                }
            }
            _ => {}
        }
    }

    fn next_reading(&mut self) -> String {
        self.measurements += 1;
        if let Some((at, liveness)) = &self.cancel_on_measurement {
            if *at == self.measurements {
                liveness.cancel("test cancel");
            }
        }
        self.readings
            .pop_front()
            .unwrap_or_else(|| self.default_reading.clone())
    }

    /// Handle one command line; returns the reply lines.
    fn handle(&mut self, command: &str) -> Vec<String> {
        self.commands.push(command.to_string());
        let mut replies = Vec::new();
        for clause in command.split(';') {
            let clause = clause.trim();
            let (key, value) = clause.split_once(' ').unwrap_or((clause, ""));
            match key {
                "SETP?" => replies.push(self.status_reply()),
                "MEAS?" => replies.push(self.next_reading()),
                _ => self.apply(key, value.trim()),
            }
        }
        replies
    }
}

pub type SharedCounter = Arc<Mutex<SimulatedCounter>>;

/// Serve `harness` until the driver drops its port.
pub fn spawn_simulator(
    mut harness: MockDeviceHarness,
    counter: SharedCounter,
) -> JoinHandle<MockDeviceHarness> {
    tokio::spawn(async move {
        while let Some(command) = harness.read_command().await {
            let replies = counter.lock().unwrap().handle(&command);
            for reply in replies {
                if harness.reply(&reply).is_err() {
                    return harness;
                }
            }
        }
        harness
    })
}

/// Short timings so tests stay fast; a reply deadline keeps failures from hanging.
pub fn fast_options() -> SessionOptions {
    SessionOptions {
        drain_timeout: Duration::from_millis(2),
        response_timeout: Some(Duration::from_secs(2)),
        settle: Duration::from_millis(1),
        progress: false,
    }
}

/// Connect a driver to a fresh simulator.
pub async fn connect(
    counter: SimulatedCounter,
    options: SessionOptions,
) -> (Sr620, SharedCounter, JoinHandle<MockDeviceHarness>) {
    connect_inner(counter, options, None).await
}

/// Like [`connect`], but every write after the first `writes` fails.
/// The two connect commands count towards `writes`.
pub async fn connect_failing_after(
    counter: SimulatedCounter,
    options: SessionOptions,
    writes: usize,
) -> (Sr620, SharedCounter, JoinHandle<MockDeviceHarness>) {
    connect_inner(counter, options, Some(writes)).await
}

async fn connect_inner(
    counter: SimulatedCounter,
    options: SessionOptions,
    fail_after: Option<usize>,
) -> (Sr620, SharedCounter, JoinHandle<MockDeviceHarness>) {
    let (port, harness) = mock_serial::new();
    if let Some(writes) = fail_after {
        harness.fail_writes_after(writes);
    }
    let shared = Arc::new(Mutex::new(counter));
    let task = spawn_simulator(harness, Arc::clone(&shared));
    let driver = Sr620::connect(Box::new(port), options)
        .await
        .expect("simulated connect failed");
    (driver, shared, task)
}
