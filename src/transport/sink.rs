//! Byte sink abstraction for the transport send path

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::{LinkError, Result};

/// Destination for packed frames (UART, DMA, channel to a writer task)
#[cfg_attr(test, mockall::automock)]
pub trait ByteSink: Send {
    /// Hand `bytes` to the hardware; may complete asynchronously
    fn write(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Sink that forwards packed frames to an async writer task
///
/// `write` never blocks: a full queue reports [`LinkError::Busy`], a dropped
/// receiver reports [`LinkError::SinkClosed`].
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    /// Create a sink and the receiver the writer task drains
    pub fn new(depth: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (Self { tx }, rx)
    }
}

impl ByteSink for ChannelSink {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        match self.tx.try_send(Bytes::copy_from_slice(bytes)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(LinkError::Busy("writer queue")),
            Err(TrySendError::Closed(_)) => Err(LinkError::SinkClosed),
        }
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Sink that records every write for inspection
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        pub written: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn writes(&self) -> Vec<Vec<u8>> {
            self.written.lock().unwrap().clone()
        }

        pub fn clear(&self) {
            self.written.lock().unwrap().clear();
        }
    }

    impl ByteSink for RecordingSink {
        fn write(&mut self, bytes: &[u8]) -> Result<()> {
            self.written.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_forwards_bytes() {
        let (mut sink, mut rx) = ChannelSink::new(4);
        sink.write(&[0xC0, 0x01, 0xC0]).unwrap();

        let received = rx.try_recv().unwrap();
        assert_eq!(&received[..], &[0xC0, 0x01, 0xC0]);
    }

    #[test]
    fn test_channel_sink_full_is_busy() {
        let (mut sink, _rx) = ChannelSink::new(1);
        sink.write(&[1]).unwrap();

        assert!(matches!(sink.write(&[2]), Err(LinkError::Busy(_))));
    }

    #[test]
    fn test_channel_sink_closed() {
        let (mut sink, rx) = ChannelSink::new(1);
        drop(rx);

        assert!(matches!(sink.write(&[1]), Err(LinkError::SinkClosed)));
    }

    #[test]
    fn test_recording_sink() {
        let mut sink = mocks::RecordingSink::new();
        sink.write(&[1, 2]).unwrap();
        sink.write(&[3]).unwrap();

        assert_eq!(sink.writes(), vec![vec![1, 2], vec![3]]);
        sink.clear();
        assert!(sink.writes().is_empty());
    }
}
