//! # Serial Communication Module
//!
//! Connects a [`Transport`](crate::transport::Transport) to the RF module over
//! a serial port.
//!
//! This module handles:
//! - Opening the port 8N1 at the configured baud rate
//! - A reader task feeding received chunks into the transport's [`Ingress`]
//! - A writer task draining packed frames from a [`ChannelSink`](crate::transport::ChannelSink)
//! - Reporting port failures to the poll loop as deferred errors

pub mod port_trait;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, ReadHalf};
use tokio::sync::mpsc;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, trace, warn};

use crate::error::{LinkError, Result};
use crate::transport::Ingress;

pub use port_trait::{SerialPortIO, TokioSerialPort};

/// Serial link to the RF module
pub struct ModuleSerial {
    port: SerialStream,
    device_path: String,
}

impl std::fmt::Debug for ModuleSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleSerial")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl ModuleSerial {
    /// Open the module's serial port
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use rc_link::serial::ModuleSerial;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let serial = ModuleSerial::open("/dev/ttyUSB0", 115200)?;
    ///     println!("Connected to: {}", serial.device_path());
    ///     Ok(())
    /// }
    /// ```
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        debug!("Opening serial port {} at {} baud", path, baud_rate);
        let port = Self::open_port(path, baud_rate)?;
        info!("Opened RF module at {}", path);

        Ok(Self {
            port,
            device_path: path.to_string(),
        })
    }

    fn open_port(path: &str, baud_rate: u32) -> Result<SerialStream> {
        tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| LinkError::Serial(format!("Failed to open {}: {}", path, e)))
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Split into the reader half and the writer port
    pub fn split(self) -> (ReadHalf<SerialStream>, TokioSerialPort) {
        let (reader, writer) = tokio::io::split(self.port);
        (reader, TokioSerialPort::new(writer))
    }
}

/// Feed everything read from `reader` into the transport
///
/// A chunk that meets a busy ring is offered again after yielding; chunks
/// refused for lack of space are dropped (the transport logs and counts
/// them). Returns when the port reaches end of stream.
///
/// # Errors
///
/// Returns error if a read fails; the error is also deferred to the poll loop
pub async fn run_reader<R>(mut reader: R, ingress: Ingress, chunk_size: usize) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; chunk_size.max(1)];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                info!("Serial reader reached end of stream");
                return Ok(());
            }
            Ok(n) => n,
            Err(e) => {
                let message = format!("Failed to read from serial port: {}", e);
                ingress.defer_error(LinkError::Serial(message.clone()));
                return Err(LinkError::Serial(message));
            }
        };

        trace!("Read {} bytes from serial port", n);
        loop {
            match ingress.read_hook(&buf[..n]) {
                Ok(_) => break,
                Err(LinkError::Busy(_)) => tokio::task::yield_now().await,
                Err(e) => {
                    debug!("Serial chunk not ingested: {}", e);
                    break;
                }
            }
        }
    }
}

/// Write packed frames to the port until every sender is gone
///
/// # Errors
///
/// Returns error on the first failed write or flush; the error is also
/// deferred to the poll loop
pub async fn run_writer<P>(mut port: P, mut frames: mpsc::Receiver<Bytes>, ingress: Ingress) -> Result<()>
where
    P: SerialPortIO,
{
    while let Some(frame) = frames.recv().await {
        let written = match port.write_all(&frame).await {
            Ok(()) => port.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            let message = format!("Failed to write frame: {}", e);
            warn!("{}", message);
            ingress.defer_error(LinkError::Serial(message.clone()));
            return Err(LinkError::Serial(message));
        }

        trace!("Wrote {} bytes to serial port", frame.len());
    }

    info!("Serial writer stopped");
    Ok(())
}
