//! Serial transport.
//!
//! A [`Connection`] owns one byte stream to the generator: a real serial port
//! opened through `tokio-serial` (the virtual port the OS creates for the
//! Bluetooth SPP module, or a USB serial adapter), or any in-memory stream for
//! tests. It moves bytes and nothing else; framing lives in
//! [`crate::protocol::codec`].
//!
//! # Example
//!
//! ```rust,ignore
//! use psg9080::config::SerialSettings;
//! use psg9080::serial::Connection;
//!
//! let mut conn = Connection::open(&SerialSettings::new("/dev/rfcomm0")).await?;
//! conn.write(b":r13=0.\r\n").await?;
//! let bytes = conn.read(Duration::from_millis(500)).await?;
//! conn.close().await;
//! ```

use crate::config::SerialSettings;
use crate::error::{DriverError, DriverResult};
use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

const READ_CHUNK: usize = 256;

// =============================================================================
// Serial Port Trait
// =============================================================================

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port. This includes:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing, simulator)
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

// Blanket implementation for all types meeting the requirements
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Whether a [`Connection`] still holds its port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Port is held and usable.
    Open,
    /// Port was released by `close`, an I/O failure or end of stream.
    Closed,
}

/// An exclusively owned serial link.
///
/// The port is released on `close`, on the first read/write failure, and on
/// drop, whichever comes first.
pub struct Connection {
    label: String,
    port: Option<DynSerial>,
    scratch: BytesMut,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("label", &self.label)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    /// Open the serial port described by `settings` (8N1, no flow control).
    #[cfg(feature = "serial")]
    pub async fn open(settings: &SerialSettings) -> DriverResult<Self> {
        let port = open_serial_async(&settings.port, settings.baud_rate).await?;
        tracing::info!(
            port = %settings.port,
            baud_rate = settings.baud_rate,
            "Opened serial port"
        );
        Ok(Self::from_stream(settings.port.clone(), port))
    }

    /// Serial support was compiled out; only in-memory streams are available.
    #[cfg(not(feature = "serial"))]
    pub async fn open(settings: &SerialSettings) -> DriverResult<Self> {
        Err(DriverError::Connection {
            port: settings.port.clone(),
            reason: "serial support not enabled. Rebuild with --features serial".into(),
        })
    }

    /// Wrap an already open stream.
    pub fn from_stream(label: impl Into<String>, stream: impl SerialPortIO + 'static) -> Self {
        Self {
            label: label.into(),
            port: Some(Box::new(stream)),
            scratch: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Port identifier.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        if self.port.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    /// True while the port is held.
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn port_mut(&mut self) -> DriverResult<&mut DynSerial> {
        let label = &self.label;
        self.port
            .as_mut()
            .ok_or_else(|| DriverError::Disconnected(format!("{label} is closed")))
    }

    /// Write all of `bytes` and flush.
    ///
    /// A failure releases the port.
    pub async fn write(&mut self, bytes: &[u8]) -> DriverResult<()> {
        let port = self.port_mut()?;
        let result = async {
            port.write_all(bytes).await?;
            port.flush().await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(port = %self.label, error = %e, "Serial write failed, releasing port");
            self.port = None;
            return Err(DriverError::Io(e));
        }
        Ok(())
    }

    /// Read whatever bytes arrive within `timeout`.
    ///
    /// Returns at least one byte, `DriverError::Timeout` when nothing arrived
    /// in time, or `DriverError::Io` (port released) on failure or end of stream.
    pub async fn read(&mut self, timeout: Duration) -> DriverResult<Bytes> {
        let label = self.label.clone();
        let Some(port) = self.port.as_mut() else {
            return Err(DriverError::Disconnected(format!("{label} is closed")));
        };

        self.scratch.reserve(READ_CHUNK);
        let outcome = tokio::time::timeout(timeout, port.read_buf(&mut self.scratch)).await;

        match outcome {
            Err(_) => Err(DriverError::Timeout {
                attempts: 1,
                timeout,
            }),
            Ok(Ok(0)) => {
                tracing::warn!(port = %label, "Serial stream reached end of file, releasing port");
                self.port = None;
                Err(DriverError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("{label} closed by peer"),
                )))
            }
            Ok(Ok(_)) => Ok(self.scratch.split().freeze()),
            Ok(Err(e)) => {
                tracing::warn!(port = %label, error = %e, "Serial read failed, releasing port");
                self.port = None;
                Err(DriverError::Io(e))
            }
        }
    }

    /// Discard bytes until the line stays quiet for `window`, giving up after
    /// `limit` on a link that never goes quiet.
    ///
    /// Returns the number of bytes discarded. Never fails; a broken port is
    /// reported by the next read or write.
    pub async fn drain(&mut self, window: Duration, limit: Duration) -> usize {
        match self.port.as_mut() {
            Some(port) => drain_serial_buffer(port, window, limit).await,
            None => 0,
        }
    }

    /// Release the port, shutting the stream down first.
    pub async fn close(&mut self) {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.shutdown().await {
                tracing::debug!(port = %self.label, error = %e, "Shutdown on close failed");
            }
            tracing::info!(port = %self.label, "Serial port closed");
        }
    }
}

// =============================================================================
// Serial Port Utilities
// =============================================================================

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
) -> DriverResult<tokio_serial::SerialStream> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    if port_path.trim().is_empty() {
        return Err(DriverError::Connection {
            port: port_path.to_string(),
            reason: "no serial port configured".into(),
        });
    }

    let port_path_owned = port_path.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
    })
    .await
    .map_err(|e| DriverError::Connection {
        port: port_path.to_string(),
        reason: format!("spawn_blocking for serial port opening failed: {e}"),
    })?
    .map_err(|e| DriverError::Connection {
        port: port_path.to_string(),
        reason: e.to_string(),
    })
}

/// A serial port visible to the operating system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSummary {
    /// Port path or name.
    pub name: String,
    /// Human readable port type.
    pub kind: String,
}

/// List serial ports, including Bluetooth SPP virtual ports.
#[cfg(feature = "serial")]
pub fn available_ports() -> DriverResult<Vec<PortSummary>> {
    let ports = serialport::available_ports().map_err(|e| DriverError::Connection {
        port: "*".into(),
        reason: format!("port enumeration failed: {e}"),
    })?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let kind = match p.port_type {
                serialport::SerialPortType::UsbPort(usb) => format!(
                    "USB {:04x}:{:04x}{}",
                    usb.vid,
                    usb.pid,
                    usb.product.map(|s| format!(" {s}")).unwrap_or_default()
                ),
                serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                serialport::SerialPortType::PciPort => "PCI".to_string(),
                serialport::SerialPortType::Unknown => "unknown".to_string(),
            };
            PortSummary {
                name: p.port_name,
                kind,
            }
        })
        .collect())
}

/// Drain stale data from a serial port buffer.
///
/// Reads and discards data until nothing arrives for `window`, or until
/// `limit` has passed in total. Used after a cancelled or timed-out exchange
/// so a late response cannot be taken as the answer to the next command.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin + ?Sized>(
    port: &mut R,
    window: Duration,
    limit: Duration,
) -> usize {
    let mut discard = [0u8; READ_CHUNK];
    let mut total_discarded = 0usize;
    let give_up = Instant::now() + limit;

    loop {
        let now = Instant::now();
        if now >= give_up {
            tracing::warn!(
                discarded = total_discarded,
                limit = ?limit,
                "Line still busy at drain limit"
            );
            break;
        }
        let quiet_until = std::cmp::min(now + window, give_up);
        match tokio::time::timeout_at(quiet_until, port.read(&mut discard)).await {
            Ok(Ok(0)) => break, // EOF
            Ok(Ok(n)) => {
                total_discarded += n;
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Ok(Err(_)) => break, // Real I/O error, surfaced by the next exchange
            Err(_) => break,     // Quiet for a full window
        }
    }

    total_discarded
}
