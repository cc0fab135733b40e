//! Write side of the serial port behind a trait, so the writer task can be
//! tested without hardware

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio_serial::SerialStream;

/// Trait for serial port output
#[async_trait]
pub trait SerialPortIO: Send {
    /// Write all data to the port
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;
}

/// Write half of an open tokio-serial port
pub struct TokioSerialPort {
    port: WriteHalf<SerialStream>,
}

impl TokioSerialPort {
    pub fn new(port: WriteHalf<SerialStream>) -> Self {
        Self { port }
    }
}

#[async_trait]
impl SerialPortIO for TokioSerialPort {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.port.flush().await
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Serial port that records frames and can be told to fail
    #[derive(Clone, Default)]
    pub struct MockSerialPort {
        pub frames: Arc<Mutex<Vec<Vec<u8>>>>,
        pub fail_after: Arc<Mutex<Option<usize>>>,
        pub flushes: Arc<Mutex<usize>>,
    }

    impl MockSerialPort {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn frames(&self) -> Vec<Vec<u8>> {
            self.frames.lock().unwrap().clone()
        }

        pub fn flush_count(&self) -> usize {
            *self.flushes.lock().unwrap()
        }

        /// Accept `count` more writes, then fail every write
        pub fn fail_after(&self, count: usize) {
            *self.fail_after.lock().unwrap() = Some(count);
        }
    }

    #[async_trait]
    impl SerialPortIO for MockSerialPort {
        async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            let mut fail_after = self.fail_after.lock().unwrap();
            match fail_after.as_mut() {
                Some(0) => {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "port unplugged"));
                }
                Some(remaining) => *remaining -= 1,
                None => {}
            }

            self.frames.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn flush(&mut self) -> io::Result<()> {
            *self.flushes.lock().unwrap() += 1;
            Ok(())
        }
    }
}
