//! Frame codec: raw packet ↔ wire frame.
//!
//! Encoding appends a CRC16 over the 6 body bytes, 7-bit-packs the
//! resulting 8 bytes, and prefixes the sync header.  Decoding reverses
//! the packing and verifies the CRC before the packet is handed to
//! anyone.  A packet that fails either step is rejected as a value —
//! the decode error distinguishes framing problems from corruption so
//! the driver can report the right ack class.

use super::crc::crc16;
use super::pack7::{self, RAW_PACKET_SIZE, UnpackError};
use super::{FRAME_SIZE, RawPacket, Request, SYNC_BYTE, SYNC_LEN};

/// Number of bytes covered by the CRC.
const BODY_SIZE: usize = 6;

/// Why a received frame was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Frame was not exactly [`FRAME_SIZE`] bytes.
    Length { got: usize },
    /// The first two bytes were not the sync marker.
    BadSync { b0: u8, b1: u8 },
    /// The packed body violated the 7-bit encoding.
    Packing(UnpackError),
    /// The body decoded cleanly but the CRC did not match.
    CrcMismatch { expected: u16, computed: u16 },
}

impl DecodeError {
    /// True for framing/length problems, false for CRC corruption.
    /// A framing error means the stream is out of sync; a CRC error
    /// means a well-framed packet was damaged in flight.
    pub fn is_framing(&self) -> bool {
        !matches!(self, Self::CrcMismatch { .. })
    }
}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Length { got } => write!(f, "frame must be {FRAME_SIZE} bytes, got {got}"),
            Self::BadSync { b0, b1 } => write!(f, "bad sync header {b0:#04x} {b1:#04x}"),
            Self::Packing(e) => write!(f, "packing: {e}"),
            Self::CrcMismatch { expected, computed } => {
                write!(f, "CRC mismatch: packet {expected:#06x}, computed {computed:#06x}")
            }
        }
    }
}

impl From<UnpackError> for DecodeError {
    fn from(e: UnpackError) -> Self {
        Self::Packing(e)
    }
}

/// Encode an arbitrary packet into a complete wire frame.
pub fn encode_packet(pkt: &RawPacket) -> [u8; FRAME_SIZE] {
    let mut raw = [0u8; RAW_PACKET_SIZE];
    raw[0] = pkt.dest;
    raw[1] = pkt.command;
    raw[2..6].copy_from_slice(&pkt.values);
    let crc = crc16(&raw[..BODY_SIZE]);
    raw[6..8].copy_from_slice(&crc.to_le_bytes());

    let packed = pack7::pack_7bit(&raw);
    let mut frame = [SYNC_BYTE; FRAME_SIZE];
    frame[SYNC_LEN..].copy_from_slice(&packed);
    frame
}

/// Encode a typed request addressed to `dest`.
pub fn encode_request(dest: u8, req: &Request) -> [u8; FRAME_SIZE] {
    encode_packet(&RawPacket {
        dest,
        command: req.code() as u8,
        values: req.values(),
    })
}

/// Decode and verify a complete wire frame.
pub fn decode_frame(frame: &[u8]) -> Result<RawPacket, DecodeError> {
    if frame.len() != FRAME_SIZE {
        return Err(DecodeError::Length { got: frame.len() });
    }
    if frame[0] != SYNC_BYTE || frame[1] != SYNC_BYTE {
        return Err(DecodeError::BadSync { b0: frame[0], b1: frame[1] });
    }

    let raw = pack7::unpack_7bit(&frame[SYNC_LEN..])?;

    let computed = crc16(&raw[..BODY_SIZE]);
    let expected = u16::from_le_bytes([raw[6], raw[7]]);
    if computed != expected {
        return Err(DecodeError::CrcMismatch { expected, computed });
    }

    let mut values = [0u8; 4];
    values.copy_from_slice(&raw[2..6]);
    Ok(RawPacket { dest: raw[0], command: raw[1], values })
}

/// Scan a received buffer for the sync marker and return the body that
/// follows it, if a complete frame is present.  Used to resynchronise
/// after a slipped byte; the happy path sees the marker at offset 0.
pub fn find_frame(buf: &[u8]) -> Option<&[u8]> {
    buf.windows(SYNC_LEN)
        .position(|w| w == [SYNC_BYTE, SYNC_BYTE])
        .and_then(|at| buf.get(at..at + FRAME_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CommandCode;

    fn sample() -> RawPacket {
        RawPacket {
            dest: 0x05,
            command: CommandCode::TickSpeedDispense as u8,
            values: [0x34, 0x12, 0xFF, 0x00],
        }
    }

    #[test]
    fn round_trip() {
        let frame = encode_packet(&sample());
        assert_eq!(decode_frame(&frame), Ok(sample()));
    }

    #[test]
    fn frame_starts_with_sync_and_body_is_marker_free() {
        let frame = encode_packet(&sample());
        assert_eq!(&frame[..2], &[0xFF, 0xFF]);
        // No wire byte after the header may even have its high bit set.
        for &b in &frame[2..] {
            assert_eq!(b & 0x80, 0);
        }
    }

    #[test]
    fn wrong_length_rejected() {
        let frame = encode_packet(&sample());
        assert_eq!(
            decode_frame(&frame[..FRAME_SIZE - 1]),
            Err(DecodeError::Length { got: FRAME_SIZE - 1 })
        );
    }

    #[test]
    fn bad_sync_rejected() {
        let mut frame = encode_packet(&sample());
        frame[1] = 0x00;
        assert!(matches!(decode_frame(&frame), Err(DecodeError::BadSync { .. })));
    }

    #[test]
    fn corrupted_body_fails_crc() {
        let mut frame = encode_packet(&sample());
        frame[4] ^= 0x01;
        let err = decode_frame(&frame).unwrap_err();
        assert!(matches!(err, DecodeError::CrcMismatch { .. }));
        assert!(!err.is_framing());
    }

    #[test]
    fn high_bit_corruption_is_a_framing_error() {
        let mut frame = encode_packet(&sample());
        frame[6] |= 0x80;
        let err = decode_frame(&frame).unwrap_err();
        assert!(err.is_framing());
    }

    #[test]
    fn find_frame_resyncs_past_garbage() {
        let frame = encode_packet(&sample());
        let mut stream = vec![0x12, 0x7F];
        stream.extend_from_slice(&frame);
        let found = find_frame(&stream).expect("frame present");
        assert_eq!(decode_frame(found), Ok(sample()));
    }

    #[test]
    fn find_frame_none_when_incomplete() {
        let frame = encode_packet(&sample());
        assert!(find_frame(&frame[..FRAME_SIZE - 3]).is_none());
    }
}
