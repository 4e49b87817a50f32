//! Request/response transactions with the counter.
//!
//! Protocol overview:
//! - Commands: ASCII, terminated by a single `\r`
//! - Replies: terminated by `\r\n`, fields separated by `,`
//!   (`;` in the legacy raw-register form)
//! - Stale bytes are drained before every transaction
//!
//! The channel never retries. Write and read failures surface as distinct
//! [`DaqError::Transport`] faults and the caller decides what they mean.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{AppResult, DaqError};
use crate::hardware::serial::DynSerial;

/// Appended to every outgoing command.
pub const COMMAND_TERMINATOR: &str = "\r";
/// Ends every reply line.
pub const RESPONSE_TERMINATOR: &[u8] = b"\r\n";
/// Field separator in replies.
pub const FIELD_DELIMITER: char = ',';
/// Field separator used by the raw register dump.
pub const LEGACY_FIELD_DELIMITER: char = ';';

/// Default time a single drain read waits for more stale bytes.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(50);

const DRAIN_CHUNK: usize = 256;
const MAX_DRAIN_READS: usize = 64;

/// One reply line split into fields.
///
/// Fields stay as text until a typed accessor asks for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    raw: String,
    fields: Vec<String>,
}

impl Response {
    /// Split a reply line on the field delimiter.
    pub fn parse(line: &str) -> Self {
        let raw = line.trim_end_matches(['\r', '\n']).to_string();
        let delimiter = if !raw.contains(FIELD_DELIMITER) && raw.contains(LEGACY_FIELD_DELIMITER)
        {
            LEGACY_FIELD_DELIMITER
        } else {
            FIELD_DELIMITER
        };
        let fields = if raw.trim().is_empty() {
            Vec::new()
        } else {
            raw.split(delimiter).map(|f| f.trim().to_string()).collect()
        };
        Self { raw, fields }
    }

    /// The reply exactly as received, minus its terminator.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Reply split into fields.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True for an empty reply.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field `index` as text, if present.
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    fn required(&self, index: usize) -> AppResult<&str> {
        self.field(index).ok_or_else(|| {
            DaqError::Parse(format!(
                "reply '{}' has no field {index} ({} fields)",
                self.raw,
                self.len()
            ))
        })
    }

    /// Field `index` as an integer.
    pub fn int(&self, index: usize) -> AppResult<i64> {
        let text = self.required(index)?;
        text.parse().map_err(|_| {
            DaqError::Parse(format!("field {index} '{text}' is not an integer"))
        })
    }

    /// Field `index` as a float.
    pub fn float(&self, index: usize) -> AppResult<f64> {
        let text = self.required(index)?;
        text.parse().map_err(|_| {
            DaqError::Parse(format!("field {index} '{text}' is not a number"))
        })
    }

    /// Bit `bit` of the integer in field `index`.
    pub fn bit(&self, index: usize, bit: u32) -> AppResult<bool> {
        let word = self.int(index)?;
        if bit >= i64::BITS {
            return Err(DaqError::Parse(format!("bit {bit} out of range")));
        }
        Ok((word >> bit) & 1 == 1)
    }

    /// Leading fields that parse as finite numbers.
    ///
    /// Stops at the first field that does not parse and never fails, so a
    /// garbled data record yields a shorter (possibly empty) list.
    pub fn values(&self) -> Vec<f64> {
        self.fields
            .iter()
            .map_while(|f| f.parse::<f64>().ok().filter(|v| v.is_finite()))
            .collect()
    }
}

/// Framed command/response access to the serial transport.
pub struct CommandChannel {
    port: BufReader<DynSerial>,
    drain_timeout: Duration,
    response_timeout: Option<Duration>,
}

impl CommandChannel {
    /// Wrap an open port with the default drain timeout and no reply deadline.
    pub fn new(port: DynSerial) -> Self {
        Self {
            port: BufReader::new(port),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            response_timeout: None,
        }
    }

    /// Time each drain read waits before deciding the line is quiet.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Upper bound on waiting for a reply. `None` waits as long as the
    /// transport does.
    pub fn with_response_timeout(mut self, response_timeout: Option<Duration>) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    /// Discard anything already received: host-side buffered bytes first,
    /// then short reads until the line goes quiet.
    ///
    /// Returns the number of bytes discarded.
    pub async fn drain(&mut self) -> AppResult<usize> {
        let buffered = self.port.buffer().len();
        self.port.consume(buffered);
        let mut discarded = buffered;

        let mut scratch = [0u8; DRAIN_CHUNK];
        for _ in 0..MAX_DRAIN_READS {
            match timeout(self.drain_timeout, self.port.get_mut().read(&mut scratch)).await {
                Err(_) | Ok(Ok(0)) => break,
                Ok(Ok(n)) => discarded += n,
                Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => break,
                Ok(Err(e)) => return Err(DaqError::read_fault(e)),
            }
        }

        if discarded > 0 {
            debug!(discarded, "Drained stale bytes");
        }
        Ok(discarded)
    }

    /// Run one transaction: drain, send `command`, and read the reply if one
    /// is expected.
    pub async fn transact(
        &mut self,
        command: &str,
        expects_response: bool,
    ) -> AppResult<Option<Response>> {
        self.drain().await?;
        self.send(command).await?;
        if !expects_response {
            return Ok(None);
        }

        let line = self.read_line().await?;
        trace!(reply = %line, "Received reply");
        Ok(Some(Response::parse(&line)))
    }

    async fn send(&mut self, command: &str) -> AppResult<()> {
        let framed = format!("{command}{COMMAND_TERMINATOR}");
        let port = self.port.get_mut();
        port.write_all(framed.as_bytes())
            .await
            .map_err(DaqError::write_fault)?;
        port.flush().await.map_err(DaqError::write_fault)?;
        debug!(command, "Sent command");
        Ok(())
    }

    async fn read_line(&mut self) -> AppResult<String> {
        let mut buf = Vec::new();
        let read = self.port.read_until(b'\n', &mut buf);
        let n = match self.response_timeout {
            Some(limit) => timeout(limit, read).await.map_err(|_| {
                DaqError::read_fault(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no reply within {limit:?}"),
                ))
            })?,
            None => read.await,
        }
        .map_err(DaqError::read_fault)?;

        if n == 0 || !buf.ends_with(b"\n") {
            return Err(DaqError::read_fault(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "channel closed before the reply terminator",
            )));
        }
        if !buf.ends_with(RESPONSE_TERMINATOR) {
            trace!("Reply ended with a bare line feed");
        }

        let text = String::from_utf8(buf)
            .map_err(|e| DaqError::read_fault(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        Ok(text.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Shut the transport down.
    pub async fn shutdown(&mut self) -> AppResult<()> {
        self.port
            .get_mut()
            .shutdown()
            .await
            .map_err(DaqError::write_fault)
    }
}

impl std::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("drain_timeout", &self.drain_timeout)
            .field("response_timeout", &self.response_timeout)
            .finish_non_exhaustive()
    }
}
