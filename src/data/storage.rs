//! Output sinks for measurement rows.
//!
//! The engine pushes rows as soon as they exist: one per sample during a set,
//! one per `(tau, deviation)` point after a sweep. Sinks flush every row so a
//! crash or cancellation never loses accepted data.
use crate::{
    data::allan::AllanPoint,
    error::{AppResult, DaqError},
    measurement::Sample,
};
use std::path::{Path, PathBuf};

/// Destination for measurement rows.
pub trait MeasurementSink: Send {
    /// Write the header row.
    fn begin(&mut self, header: &[&str]) -> AppResult<()>;

    /// Write and flush one data row.
    fn write_row(&mut self, row: &[String]) -> AppResult<()>;

    /// Flush anything pending. Called on every exit path of a run.
    fn finish(&mut self) -> AppResult<()>;

    /// Row of RFC 3339 timestamp and value.
    fn write_sample(&mut self, sample: &Sample) -> AppResult<()> {
        self.write_row(&[sample.timestamp.to_rfc3339(), sample.value.to_string()])
    }

    /// Row of tau and deviation.
    fn write_point(&mut self, point: &AllanPoint) -> AppResult<()> {
        self.write_row(&[point.tau.to_string(), point.deviation.to_string()])
    }
}

/// File name of the form `<kind>_<UTC timestamp>.csv` inside `dir`.
pub fn timestamped_path(dir: &Path, kind: &str) -> PathBuf {
    dir.join(format!(
        "{}_{}.csv",
        kind,
        chrono::Utc::now().format("%Y%m%d_%H%M%S")
    ))
}

/// Rows kept in memory, mostly for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    /// Last header passed to `begin`.
    pub header: Vec<String>,
    /// Data rows in arrival order.
    pub rows: Vec<Vec<String>>,
    /// Number of `finish` calls seen.
    pub finished: usize,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MeasurementSink for MemorySink {
    fn begin(&mut self, header: &[&str]) -> AppResult<()> {
        self.header = header.iter().map(|h| (*h).to_string()).collect();
        Ok(())
    }

    fn write_row(&mut self, row: &[String]) -> AppResult<()> {
        self.rows.push(row.to_vec());
        Ok(())
    }

    fn finish(&mut self) -> AppResult<()> {
        self.finished += 1;
        Ok(())
    }
}

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    /// A sink writing CSV rows, flushed after every row.
    pub struct CsvSink<W: Write + Send = File> {
        path: Option<PathBuf>,
        writer: csv::Writer<W>,
        rows: usize,
    }

    impl CsvSink<File> {
        /// Create (or truncate) a CSV file, creating parent directories.
        pub fn create(path: impl AsRef<Path>) -> AppResult<Self> {
            let path = path.as_ref();
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                if !parent.exists() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| DaqError::Storage(e.to_string()))?;
                }
            }
            let file = File::create(path)
                .map_err(|e| DaqError::Storage(format!("Failed to create CSV file: {}", e)))?;
            tracing::info!("CSV sink writing to '{}'.", path.display());
            Ok(Self {
                path: Some(path.to_path_buf()),
                writer: csv::Writer::from_writer(file),
                rows: 0,
            })
        }
    }

    impl<W: Write + Send> CsvSink<W> {
        /// Sink over any writer, with no backing path.
        pub fn from_writer(writer: W) -> Self {
            Self {
                path: None,
                writer: csv::Writer::from_writer(writer),
                rows: 0,
            }
        }

        /// File being written, when created with [`CsvSink::create`].
        pub fn path(&self) -> Option<&Path> {
            self.path.as_deref()
        }

        /// Data rows written so far.
        pub fn rows(&self) -> usize {
            self.rows
        }

        /// Flush and return the underlying writer.
        pub fn into_inner(self) -> AppResult<W> {
            self.writer
                .into_inner()
                .map_err(|e| DaqError::Storage(e.to_string()))
        }
    }

    impl<W: Write + Send> MeasurementSink for CsvSink<W> {
        fn begin(&mut self, header: &[&str]) -> AppResult<()> {
            self.writer
                .write_record(header)
                .and_then(|()| self.writer.flush().map_err(csv::Error::from))
                .map_err(|e| DaqError::Storage(e.to_string()))
        }

        fn write_row(&mut self, row: &[String]) -> AppResult<()> {
            self.writer
                .write_record(row)
                .and_then(|()| self.writer.flush().map_err(csv::Error::from))
                .map_err(|e| DaqError::Storage(e.to_string()))?;
            self.rows += 1;
            Ok(())
        }

        fn finish(&mut self) -> AppResult<()> {
            self.writer
                .flush()
                .map_err(|e| DaqError::Storage(e.to_string()))?;
            tracing::debug!(rows = self.rows, "CSV sink flushed.");
            Ok(())
        }
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;

    /// Placeholder when the crate is built without `storage_csv`.
    pub struct CsvSink;

    impl CsvSink {
        /// Always fails with `FeatureNotEnabled`.
        pub fn create(_path: impl AsRef<Path>) -> AppResult<Self> {
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }
    }

    impl MeasurementSink for CsvSink {
        fn begin(&mut self, _header: &[&str]) -> AppResult<()> {
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }
        fn write_row(&mut self, _row: &[String]) -> AppResult<()> {
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }
        fn finish(&mut self) -> AppResult<()> {
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::CsvSink;
#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::CsvSink;
