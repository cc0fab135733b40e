//! # SLIP-Style Codec
//!
//! Byte-stuffed framing used on the RF module link.
//!
//! ```text
//! [END] escape([addr][seq][cmd][payload..][checksum]) [END]
//! ```
//!
//! - `addr` packs source (high nibble) and destination (low nibble)
//! - `checksum` is the bitwise complement of the wrapping sum of
//!   `addr..payload`, computed on unescaped bytes
//! - END and ESC inside the frame are sent as `ESC ESC_END` / `ESC ESC_ESC`

use bytes::{BufMut, BytesMut};
use tracing::trace;

use super::FrameCodec;
use crate::error::{LinkError, Result};
use crate::transport::{Address, Frame};

/// Frame delimiter
pub const END: u8 = 0xC0;

/// Escape marker
pub const ESC: u8 = 0xDB;

/// Escaped END
pub const ESC_END: u8 = 0xDC;

/// Escaped ESC
pub const ESC_ESC: u8 = 0xDD;

/// addr + seq + cmd + checksum
pub const BODY_OVERHEAD: usize = 4;

/// Two delimiters around an unescaped body with no payload
pub const FRAME_MIN: usize = 2 + BODY_OVERHEAD;

pub const MAX_PAYLOAD_SIZE: usize = 255;

/// Every body byte escaped
pub const FRAME_MAX: usize = 2 + 2 * (BODY_OVERHEAD + MAX_PAYLOAD_SIZE);

/// One's-complement of the wrapping byte sum
///
/// # Examples
///
/// ```
/// use rc_link::codec::slip::checksum;
///
/// assert_eq!(checksum(&[0x01, 0x02]), 0xFC);
/// ```
pub fn checksum(body: &[u8]) -> u8 {
    !body.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

fn put_escaped(out: &mut BytesMut, byte: u8) {
    match byte {
        END => {
            out.put_u8(ESC);
            out.put_u8(ESC_END);
        }
        ESC => {
            out.put_u8(ESC);
            out.put_u8(ESC_ESC);
        }
        _ => out.put_u8(byte),
    }
}

/// Index of the closing END in `buf` (which starts with the opening END)
///
/// A byte following an ESC is never a boundary.
pub fn find_frame_end(buf: &[u8]) -> Option<usize> {
    let mut i = 1;

    while i < buf.len() {
        match buf[i] {
            END => return Some(i),
            ESC => i += 2,
            _ => i += 1,
        }
    }

    None
}

/// Reverse byte stuffing, `None` on a dangling or unknown escape
pub fn unescape(escaped: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(escaped.len());
    let mut bytes = escaped.iter();

    while let Some(&b) = bytes.next() {
        if b != ESC {
            out.push(b);
            continue;
        }

        match bytes.next() {
            Some(&ESC_END) => out.push(END),
            Some(&ESC_ESC) => out.push(ESC),
            _ => return None,
        }
    }

    Some(out)
}

/// SLIP framing with address, sequence and checksum
#[derive(Debug, Clone)]
pub struct SlipCodec {
    max_payload: usize,
}

impl Default for SlipCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl SlipCodec {
    pub fn new() -> Self {
        Self {
            max_payload: MAX_PAYLOAD_SIZE,
        }
    }

    /// Limit payload size below the format maximum
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload.min(MAX_PAYLOAD_SIZE);
        self
    }
}

impl FrameCodec for SlipCodec {
    fn name(&self) -> &'static str {
        "slip"
    }

    fn sync_byte(&self) -> u8 {
        END
    }

    fn frame_min(&self) -> usize {
        FRAME_MIN
    }

    fn frame_max(&self) -> usize {
        2 + 2 * (BODY_OVERHEAD + self.max_payload)
    }

    fn addressed(&self) -> bool {
        true
    }

    fn pack(&self, frame: &Frame, out: &mut BytesMut) -> Result<()> {
        if frame.payload.len() > self.max_payload {
            return Err(LinkError::Codec(format!(
                "Payload size {} exceeds maximum {}",
                frame.payload.len(),
                self.max_payload
            )));
        }

        let head = [
            frame.address.unwrap_or_default().to_byte(),
            frame.sequence.unwrap_or(0),
            frame.command,
        ];
        let mut sum = 0u8;

        out.reserve(2 + 2 * (BODY_OVERHEAD + frame.payload.len()));
        out.put_u8(END);
        for &b in head.iter().chain(frame.payload.iter()) {
            sum = sum.wrapping_add(b);
            put_escaped(out, b);
        }
        put_escaped(out, !sum);
        out.put_u8(END);

        Ok(())
    }

    fn unpack(&self, buf: &[u8]) -> Option<(Frame, usize)> {
        if buf.len() < FRAME_MIN || buf[0] != END {
            return None;
        }

        let end = find_frame_end(buf)?;
        let body = unescape(&buf[1..end])?;

        if body.len() < BODY_OVERHEAD || body.len() - BODY_OVERHEAD > self.max_payload {
            return None;
        }

        let (data, received) = body.split_at(body.len() - 1);
        let calculated = checksum(data);
        if calculated != received[0] {
            trace!(
                "Checksum mismatch: expected 0x{:02X}, got 0x{:02X}",
                calculated,
                received[0]
            );
            return None;
        }

        let frame = Frame::new(data[2], data[3..].to_vec())
            .with_address(Address::from_byte(data[0]))
            .with_sequence(data[1]);

        Some((frame, end + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(frame: &Frame) -> Vec<u8> {
        let mut out = BytesMut::new();
        SlipCodec::new().pack(frame, &mut out).unwrap();
        out.to_vec()
    }

    fn addressed(command: u8, payload: Vec<u8>) -> Frame {
        Frame::new(command, payload)
            .with_address(Address::new(0x1, 0x2))
            .with_sequence(7)
    }

    #[test]
    fn test_checksum() {
        assert_eq!(checksum(&[]), 0xFF);
        assert_eq!(checksum(&[0xFF]), 0x00);
        assert_eq!(checksum(&[0x80, 0x80, 0x01]), 0xFE);
    }

    #[test]
    fn test_pack_layout() {
        let bytes = pack(&addressed(0x05, vec![0x01]));

        assert_eq!(bytes[0], END);
        assert_eq!(bytes[1], 0x12);
        assert_eq!(bytes[2], 7);
        assert_eq!(bytes[3], 0x05);
        assert_eq!(bytes[4], 0x01);
        assert_eq!(bytes[5], checksum(&[0x12, 7, 0x05, 0x01]));
        assert_eq!(bytes[6], END);
        assert_eq!(bytes.len(), 7);
    }

    #[test]
    fn test_every_byte_value_survives() {
        let codec = SlipCodec::new();

        for value in 0..=u8::MAX {
            let frame = addressed(value, vec![value, END, value, ESC, value]);
            let bytes = pack(&frame);

            // Only the delimiters may be raw END bytes
            assert_eq!(bytes.iter().filter(|&&b| b == END).count(), 2);

            let (decoded, len) = codec.unpack(&bytes).unwrap();
            assert_eq!(decoded, frame, "byte 0x{:02X}", value);
            assert_eq!(len, bytes.len());
        }
    }

    #[test]
    fn test_full_payload_of_all_values() {
        let payload: Vec<u8> = (0..=254).collect();
        let frame = addressed(0x09, payload);
        let bytes = pack(&frame);

        assert!(bytes.len() <= FRAME_MAX);
        assert_eq!(SlipCodec::new().unpack(&bytes).unwrap().0, frame);
    }

    #[test]
    fn test_escaped_checksum() {
        // Pick a payload byte that makes the checksum equal END
        let head = [Address::new(1, 2).to_byte(), 0, 0x01];
        let needed = (!END).wrapping_sub(head.iter().fold(0u8, |a, &b| a.wrapping_add(b)));
        let frame = Frame::new(0x01, vec![needed])
            .with_address(Address::new(1, 2))
            .with_sequence(0);

        let bytes = pack(&frame);
        assert_eq!(&bytes[bytes.len() - 3..], &[ESC, ESC_END, END]);
        assert_eq!(SlipCodec::new().unpack(&bytes).unwrap().0, frame);
    }

    #[test]
    fn test_missing_fields_pack_as_zero() {
        let bytes = pack(&Frame::new(0x03, vec![]));
        let (decoded, _) = SlipCodec::new().unpack(&bytes).unwrap();

        assert_eq!(decoded.address, Some(Address::default()));
        assert_eq!(decoded.sequence, Some(0));
    }

    #[test]
    fn test_find_frame_end_skips_escaped() {
        let buf = [END, 0x01, ESC, ESC_END, 0x02, END, 0x03];
        assert_eq!(find_frame_end(&buf), Some(5));
        assert_eq!(find_frame_end(&buf[..5]), None);

        // END right after an ESC is not a boundary
        let buf = [END, ESC, END, 0x01];
        assert_eq!(find_frame_end(&buf), None);
    }

    #[test]
    fn test_unescape_rejects_bad_sequences() {
        assert_eq!(unescape(&[0x01, ESC, ESC_ESC]), Some(vec![0x01, ESC]));
        assert_eq!(unescape(&[ESC, 0x01]), None);
        assert_eq!(unescape(&[0x01, ESC]), None);
    }

    #[test]
    fn test_unpack_incomplete() {
        let bytes = pack(&addressed(0x04, vec![1, 2, 3]));
        let codec = SlipCodec::new();

        for cut in 0..bytes.len() {
            assert!(codec.unpack(&bytes[..cut]).is_none(), "cut at {}", cut);
        }
    }

    #[test]
    fn test_unpack_bad_checksum() {
        let mut bytes = pack(&addressed(0x04, vec![1, 2, 3]));
        bytes[5] ^= 0x10;
        assert!(SlipCodec::new().unpack(&bytes).is_none());
    }

    #[test]
    fn test_back_to_back_delimiters() {
        // A closing END followed by the next frame's opening END
        let bytes = pack(&addressed(0x04, vec![]));
        let mut stream = vec![END];
        stream.extend_from_slice(&bytes);

        let codec = SlipCodec::new();
        assert!(codec.unpack(&stream).is_none());
        assert!(codec.unpack(&stream[1..]).is_some());
    }

    #[test]
    fn test_max_payload_limit() {
        let codec = SlipCodec::new().with_max_payload(4);
        assert_eq!(codec.frame_max(), 2 + 2 * (BODY_OVERHEAD + 4));

        let mut out = BytesMut::new();
        assert!(codec.pack(&addressed(0x01, vec![0; 5]), &mut out).is_err());

        // Frame built by a permissive peer is refused on decode
        let bytes = pack(&addressed(0x01, vec![0; 5]));
        assert!(codec.unpack(&bytes).is_none());
    }
}
