//! # Wire Codecs
//!
//! Pluggable frame formats for the [`Transport`](crate::transport::Transport).
//!
//! This module handles:
//! - The [`FrameCodec`] contract (sync byte, size bounds, pack, unpack)
//! - Length+CRC16 framing ([`length_crc`])
//! - SLIP-style byte stuffing with a one's-complement checksum ([`slip`])
//! - Runtime codec selection from configuration ([`WireCodec`])

pub mod crc;
pub mod length_crc;
pub mod slip;

use bytes::BytesMut;

use crate::error::Result;
use crate::transport::Frame;

pub use length_crc::LengthCrcCodec;
pub use slip::SlipCodec;

/// One concrete wire format
///
/// `unpack` is handed a buffer that starts with the sync byte. It returns
/// the frame and the number of bytes it occupies, or `None` when the buffer
/// does not start with a complete valid frame (corrupt, truncated, or not a
/// frame at all; the transport treats these the same).
pub trait FrameCodec: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Marker byte every frame starts with
    fn sync_byte(&self) -> u8;

    /// Smallest possible encoded frame
    fn frame_min(&self) -> usize;

    /// Largest possible encoded frame
    fn frame_max(&self) -> usize;

    /// Whether frames carry address and sequence fields
    fn addressed(&self) -> bool {
        false
    }

    /// Append the wire encoding of `frame` to `out`
    fn pack(&self, frame: &Frame, out: &mut BytesMut) -> Result<()>;

    /// Decode one frame from the start of `buf`
    fn unpack(&self, buf: &[u8]) -> Option<(Frame, usize)>;
}

/// Codec chosen at runtime (e.g. from the config file)
#[derive(Debug, Clone)]
pub enum WireCodec {
    Slip(SlipCodec),
    LengthCrc(LengthCrcCodec),
}

impl WireCodec {
    /// Build a codec from its config name (`"slip"` or `"length_crc"`)
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "slip" => Some(Self::Slip(SlipCodec::new())),
            "length_crc" => Some(Self::LengthCrc(LengthCrcCodec::new())),
            _ => None,
        }
    }

    fn inner(&self) -> &dyn FrameCodec {
        match self {
            Self::Slip(codec) => codec,
            Self::LengthCrc(codec) => codec,
        }
    }
}

impl FrameCodec for WireCodec {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn sync_byte(&self) -> u8 {
        self.inner().sync_byte()
    }

    fn frame_min(&self) -> usize {
        self.inner().frame_min()
    }

    fn frame_max(&self) -> usize {
        self.inner().frame_max()
    }

    fn addressed(&self) -> bool {
        self.inner().addressed()
    }

    fn pack(&self, frame: &Frame, out: &mut BytesMut) -> Result<()> {
        self.inner().pack(frame, out)
    }

    fn unpack(&self, buf: &[u8]) -> Option<(Frame, usize)> {
        self.inner().unpack(buf)
    }
}
