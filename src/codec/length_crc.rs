//! # Length+CRC16 Codec
//!
//! Frame layout:
//!
//! ```text
//! [sync][cmd][len][payload: len bytes][crc_lo][crc_hi]
//! ```
//!
//! The CRC covers every byte before it, sync byte included.

use bytes::{BufMut, BytesMut};
use tracing::trace;

use super::crc::{Crc16, Crc16Params, CRC16_CCITT_FALSE};
use super::FrameCodec;
use crate::error::{LinkError, Result};
use crate::transport::Frame;

/// Default sync byte for this format
pub const DEFAULT_SYNC_BYTE: u8 = 0x55;

/// sync + cmd + len
pub const HEADER_SIZE: usize = 3;

/// Trailing CRC16, little-endian
pub const CRC_SIZE: usize = 2;

/// Frame with an empty payload
pub const FRAME_MIN: usize = HEADER_SIZE + CRC_SIZE;

/// Length field is one byte
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize;

pub const FRAME_MAX: usize = FRAME_MIN + MAX_PAYLOAD_SIZE;

/// Header + length + CRC16 codec
#[derive(Debug, Clone)]
pub struct LengthCrcCodec {
    sync: u8,
    crc: Crc16,
}

impl Default for LengthCrcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LengthCrcCodec {
    /// Codec with sync 0x55 and CRC-16/CCITT-FALSE
    pub fn new() -> Self {
        Self {
            sync: DEFAULT_SYNC_BYTE,
            crc: Crc16::new(CRC16_CCITT_FALSE),
        }
    }

    pub fn with_sync_byte(mut self, sync: u8) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_crc(mut self, params: Crc16Params) -> Self {
        self.crc = Crc16::new(params);
        self
    }
}

impl FrameCodec for LengthCrcCodec {
    fn name(&self) -> &'static str {
        "length_crc"
    }

    fn sync_byte(&self) -> u8 {
        self.sync
    }

    fn frame_min(&self) -> usize {
        FRAME_MIN
    }

    fn frame_max(&self) -> usize {
        FRAME_MAX
    }

    fn pack(&self, frame: &Frame, out: &mut BytesMut) -> Result<()> {
        if frame.address.is_some() || frame.sequence.is_some() {
            return Err(LinkError::Codec(
                "length_crc frames carry no address or sequence".to_string(),
            ));
        }

        if frame.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(LinkError::Codec(format!(
                "Payload size {} exceeds maximum {}",
                frame.payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }

        let start = out.len();
        out.reserve(FRAME_MIN + frame.payload.len());
        out.put_u8(self.sync);
        out.put_u8(frame.command);
        out.put_u8(frame.payload.len() as u8);
        out.put_slice(&frame.payload);

        let crc = self.crc.checksum(&out[start..]);
        out.put_u16_le(crc);

        Ok(())
    }

    fn unpack(&self, buf: &[u8]) -> Option<(Frame, usize)> {
        if buf.len() < FRAME_MIN || buf[0] != self.sync {
            return None;
        }

        let len = buf[2] as usize;
        if len > buf.len() - FRAME_MIN {
            return None;
        }

        let crc_at = HEADER_SIZE + len;
        let received = u16::from_le_bytes([buf[crc_at], buf[crc_at + 1]]);
        let calculated = self.crc.checksum(&buf[..crc_at]);

        if received != calculated {
            trace!(
                "CRC mismatch: expected 0x{:04X}, got 0x{:04X}",
                calculated,
                received
            );
            return None;
        }

        let frame = Frame::new(buf[1], buf[HEADER_SIZE..crc_at].to_vec());
        Some((frame, crc_at + CRC_SIZE))
    }
}
