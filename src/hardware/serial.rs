//! Byte transport underneath the command channel.
//!
//! Anything that is `AsyncRead + AsyncWrite + Unpin + Send` can carry the
//! protocol: a real `tokio_serial::SerialStream`, the in-memory
//! [`MockSerialPort`](super::mock_serial::MockSerialPort), or a TCP bridge.

use tokio::io::{AsyncRead, AsyncWrite};

/// Trait alias for serial-like byte streams.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Boxed transport owned by a command channel.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Default line rate of the counter's RS-232 port.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Open a serial device at 8N1 with no flow control.
///
/// Port opening can block on some platforms, so it runs on the blocking pool.
#[cfg(feature = "tokio_serial")]
pub async fn open_port(port_path: &str, baud_rate: u32) -> crate::error::AppResult<DynSerial> {
    use crate::error::DaqError;
    use tokio_serial::SerialPortBuilderExt;

    let path = port_path.to_string();
    let port = tokio::task::spawn_blocking(move || {
        tokio_serial::new(&path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
    })
    .await
    .map_err(|e| DaqError::Io(std::io::Error::other(e)))?
    .map_err(|e| DaqError::Io(std::io::Error::other(format!("{port_path}: {e}"))))?;

    tracing::info!(port = port_path, baud_rate, "Opened serial port");
    Ok(Box::new(port))
}

/// Stand-in used when the crate is built without serial support.
#[cfg(not(feature = "tokio_serial"))]
pub async fn open_port(_port_path: &str, _baud_rate: u32) -> crate::error::AppResult<DynSerial> {
    Err(crate::error::DaqError::FeatureNotEnabled(
        "tokio_serial".to_string(),
    ))
}
