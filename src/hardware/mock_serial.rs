//! In-memory serial port for exercising the counter driver without hardware.
//!
//! `new()` returns a connected pair:
//! - `MockSerialPort` (given to the driver): implements `AsyncRead`/`AsyncWrite`
//! - `MockDeviceHarness` (kept by the test): sees every command and scripts replies
//!
//! The pair shares a write counter so tests can assert how many times the
//! driver touched the channel, and a failure threshold so a test can make the
//! Nth write fail with `BrokenPipe`.
//!
//! # Example
//!
//! ```rust,ignore
//! use sr620_daq::hardware::mock_serial;
//!
//! let (port, mut harness) = mock_serial::new();
//! // hand `port` to the driver, then:
//! let command = harness.read_command().await.unwrap();
//! assert_eq!(command, "SETP?");
//! harness.send_response(b"3,0,5,0,0,0,0,32\r\n").unwrap();
//! ```

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{timeout, Duration};

/// Byte that terminates every command the driver writes.
const COMMAND_END: u8 = b'\r';

const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Counters shared by both halves of the pair.
#[derive(Debug)]
struct WriteControl {
    attempts: AtomicUsize,
    fail_after: AtomicUsize,
}

/// The driver-facing side of the mock serial port.
#[derive(Debug)]
pub struct MockSerialPort {
    writes_tx: UnboundedSender<Vec<u8>>,
    reads_rx: UnboundedReceiver<Vec<u8>>,
    read_buffer: VecDeque<u8>,
    control: Arc<WriteControl>,
}

/// The test-facing side for controlling the mock serial port.
#[derive(Debug)]
pub struct MockDeviceHarness {
    writes_rx: UnboundedReceiver<Vec<u8>>,
    reads_tx: UnboundedSender<Vec<u8>>,
    write_buffer: Vec<u8>,
    control: Arc<WriteControl>,
}

/// Creates a new connected pair of `MockSerialPort` and `MockDeviceHarness`.
pub fn new() -> (MockSerialPort, MockDeviceHarness) {
    let (client_to_harness_tx, client_to_harness_rx) = mpsc::unbounded_channel();
    let (harness_to_client_tx, harness_to_client_rx) = mpsc::unbounded_channel();
    let control = Arc::new(WriteControl {
        attempts: AtomicUsize::new(0),
        fail_after: AtomicUsize::new(usize::MAX),
    });

    let port = MockSerialPort {
        writes_tx: client_to_harness_tx,
        reads_rx: harness_to_client_rx,
        read_buffer: VecDeque::new(),
        control: Arc::clone(&control),
    };

    let harness = MockDeviceHarness {
        writes_rx: client_to_harness_rx,
        reads_tx: harness_to_client_tx,
        write_buffer: Vec::new(),
        control,
    };

    (port, harness)
}

impl MockSerialPort {
    fn fill(&mut self, buf: &mut ReadBuf<'_>) {
        let to_read = std::cmp::min(buf.remaining(), self.read_buffer.len());
        let chunk: Vec<u8> = self.read_buffer.drain(..to_read).collect();
        buf.put_slice(&chunk);
    }
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.read_buffer.is_empty() {
            self.fill(buf);
            return Poll::Ready(Ok(()));
        }

        match self.reads_rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                self.read_buffer.extend(chunk);
                self.fill(buf);
                Poll::Ready(Ok(()))
            }
            // Harness dropped: end-of-file
            Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let attempt = self.control.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > self.control.fail_after.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("injected failure on write {attempt}"),
            )));
        }

        match self.writes_tx.send(buf.to_vec()) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock device harness disconnected",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl MockDeviceHarness {
    /// Sends bytes to the driver as if the device had transmitted them.
    ///
    /// # Errors
    /// Returns error if the client port has been disconnected
    pub fn send_response(&self, data: &[u8]) -> Result<(), &'static str> {
        self.reads_tx
            .send(data.to_vec())
            .map_err(|_| "Failed to send response: client port disconnected")
    }

    /// Sends one reply line, appending the `\r\n` terminator.
    ///
    /// # Errors
    /// Returns error if the client port has been disconnected
    pub fn reply(&self, line: &str) -> Result<(), &'static str> {
        self.send_response(format!("{line}\r\n").as_bytes())
    }

    /// Make every write after the first `writes` successful ones fail.
    pub fn fail_writes_after(&self, writes: usize) {
        self.control.fail_after.store(writes, Ordering::SeqCst);
    }

    /// Number of write calls the driver has made, failed ones included.
    pub fn write_attempts(&self) -> usize {
        self.control.attempts.load(Ordering::SeqCst)
    }

    /// Waits for the next complete command and returns it without its terminator.
    ///
    /// Returns `None` once the driver side has been dropped and no complete
    /// command remains buffered.
    pub async fn read_command(&mut self) -> Option<String> {
        loop {
            if let Some(end) = self.write_buffer.iter().position(|&b| b == COMMAND_END) {
                let line: Vec<u8> = self.write_buffer.drain(..=end).collect();
                return Some(String::from_utf8_lossy(&line[..end]).into_owned());
            }
            let chunk = self.writes_rx.recv().await?;
            self.write_buffer.extend_from_slice(&chunk);
        }
    }

    /// Waits for the client to write specific data and asserts its correctness.
    ///
    /// # Panics
    /// Panics if the expected data is not received within 2 seconds or if
    /// the received data does not match the expected data.
    pub async fn expect_write(&mut self, expected: &[u8]) {
        while self.write_buffer.len() < expected.len() {
            match timeout(WRITE_TIMEOUT, self.writes_rx.recv()).await {
                Ok(Some(chunk)) => self.write_buffer.extend_from_slice(&chunk),
                Ok(None) => panic!("Client-side port closed while expecting a write."),
                Err(_) => panic!(
                    "Timeout waiting for write. Expected `{:?}`, but only received `{:?}`.",
                    String::from_utf8_lossy(expected),
                    String::from_utf8_lossy(&self.write_buffer),
                ),
            }
        }

        let actual = &self.write_buffer[..expected.len()];
        assert_eq!(
            actual,
            expected,
            "Mismatch in expected write. Expected `{:?}`, got `{:?}`.",
            String::from_utf8_lossy(expected),
            String::from_utf8_lossy(actual)
        );
        self.write_buffer.drain(..expected.len());
    }

    /// Expects a write and sends a response in one operation.
    ///
    /// # Panics
    /// Panics under the same conditions as [`expect_write`](Self::expect_write),
    /// or if the client port is gone.
    #[allow(clippy::expect_used)]
    pub async fn expect_and_respond(&mut self, expected: &[u8], response: &[u8]) {
        self.expect_write(expected).await;
        self.send_response(response)
            .expect("Failed to send response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn test_command_response() {
        let (port, mut harness) = new();
        let mut port = BufReader::new(port);

        let app_task = tokio::spawn(async move {
            port.write_all(b"SETP?\r").await.unwrap();
            let mut response = String::new();
            port.read_line(&mut response).await.unwrap();
            response
        });

        harness.expect_and_respond(b"SETP?\r", b"3,0,5\r\n").await;
        assert_eq!(app_task.await.unwrap(), "3,0,5\r\n");
    }

    #[tokio::test]
    async fn read_command_splits_on_carriage_return() {
        let (mut port, mut harness) = new();
        port.write_all(b"ENDT;STOP\rMEA").await.unwrap();
        port.write_all(b"S? 0\r").await.unwrap();

        assert_eq!(harness.read_command().await.as_deref(), Some("ENDT;STOP"));
        assert_eq!(harness.read_command().await.as_deref(), Some("MEAS? 0"));

        drop(port);
        assert_eq!(harness.read_command().await, None);
    }

    #[tokio::test]
    async fn injected_failure_hits_the_chosen_write() {
        let (mut port, harness) = new();
        harness.fail_writes_after(2);

        port.write_all(b"A\r").await.unwrap();
        port.write_all(b"B\r").await.unwrap();
        let err = port.write_all(b"C\r").await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(harness.write_attempts(), 3);
    }

    #[tokio::test]
    async fn dropped_harness_reads_as_eof() {
        let (port, harness) = new();
        drop(harness);
        let mut port = BufReader::new(port);
        let mut line = String::new();
        assert_eq!(port.read_line(&mut line).await.unwrap(), 0);
    }
}
