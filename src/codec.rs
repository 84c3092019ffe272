// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wire codec: the 20-byte DSU header, CRC32 integrity, and outbound framing.
//!
//! All multi-byte integers are little-endian except the MAC address, which
//! travels big-endian inside the `data` request/response bodies.

use crate::error::ProtocolError;
use byteorder::{ByteOrder, LittleEndian};

/// Protocol version carried in every header (both directions).
pub const PROTOCOL_VERSION: u16 = 1001;

/// Size of the common header plus the message-type discriminator.
pub const HEADER_LEN: usize = 20;

pub const MSG_TYPE_VERSION: u32 = 0x0010_0000;
pub const MSG_TYPE_PORTS: u32 = 0x0010_0001;
pub const MSG_TYPE_DATA: u32 = 0x0010_0002;

/// Result of successfully validating an inbound header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedHeader {
    pub source_id: u32,
    pub message_type: u32,
}

/// CRC32 (IEEE) of `buf` with the 4-byte CRC field (offset 8..12) zeroed.
///
/// Shared by the inbound validator and the outbound framer, so encode/decode
/// always agree on the checksum domain.
fn checksum_with_crc_field_zeroed(buf: &[u8]) -> u32 {
    debug_assert!(buf.len() >= 12, "buffer too short to contain a CRC field");
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[0..8]);
    hasher.update(&[0, 0, 0, 0]);
    hasher.update(&buf[12..]);
    hasher.finalize()
}

/// Validate and parse the 20-byte DSU header.
///
/// `magic_char` is `b'C'` for inbound client datagrams, `b'S'` for (testing)
/// outbound server datagrams. Validates magic, then version, then length,
/// then CRC, in that order.
pub fn parse_header(magic_char: u8, buf: &[u8]) -> Result<ParsedHeader, ProtocolError> {
    if buf.len() < HEADER_LEN {
        return Err(ProtocolError::TooShort);
    }
    if buf[0] != b'D' || buf[1] != b'S' || buf[2] != b'U' || buf[3] != magic_char {
        return Err(ProtocolError::BadMagic);
    }
    let version = LittleEndian::read_u16(&buf[4..6]);
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::BadVersion);
    }
    let payload_length = LittleEndian::read_u16(&buf[6..8]) as usize;
    if payload_length != buf.len() - 16 {
        return Err(ProtocolError::BadLength);
    }
    let claimed_crc = LittleEndian::read_u32(&buf[8..12]);
    let actual_crc = checksum_with_crc_field_zeroed(buf);
    if claimed_crc != actual_crc {
        return Err(ProtocolError::BadChecksum);
    }
    let source_id = LittleEndian::read_u32(&buf[12..16]);
    let message_type = LittleEndian::read_u32(&buf[16..20]);
    Ok(ParsedHeader {
        source_id,
        message_type,
    })
}

/// Begin an outbound datagram: writes the 20-byte header with the CRC field
/// left at zero and the length field left at zero. Call [`finalize`] once the
/// body has been appended.
pub fn write_header(buf: &mut Vec<u8>, magic_char: u8, source_id: u32, message_type: u32) {
    buf.extend_from_slice(&[b'D', b'S', b'U', magic_char]);
    let mut tmp = [0u8; 2];
    LittleEndian::write_u16(&mut tmp, PROTOCOL_VERSION);
    buf.extend_from_slice(&tmp);
    buf.extend_from_slice(&[0, 0]); // payload_length, patched in finalize()
    buf.extend_from_slice(&[0, 0, 0, 0]); // crc32, patched in finalize()
    let mut tmp4 = [0u8; 4];
    LittleEndian::write_u32(&mut tmp4, source_id);
    buf.extend_from_slice(&tmp4);
    LittleEndian::write_u32(&mut tmp4, message_type);
    buf.extend_from_slice(&tmp4);
}

/// Patch the length and CRC32 fields of a datagram built with [`write_header`].
pub fn finalize(buf: &mut [u8]) {
    let length = (buf.len() - 16) as u16;
    LittleEndian::write_u16(&mut buf[6..8], length);
    buf[8..12].copy_from_slice(&[0, 0, 0, 0]);
    let crc = checksum_with_crc_field_zeroed(buf);
    LittleEndian::write_u32(&mut buf[8..12], crc);
}

/// Recompute the CRC32 field in place, without touching length or any other
/// field. Used by the emitter to patch the per-client packet number before
/// resend without rebuilding the whole datagram.
pub fn recompute_crc(buf: &mut [u8]) {
    buf[8..12].copy_from_slice(&[0, 0, 0, 0]);
    let crc = checksum_with_crc_field_zeroed(buf);
    LittleEndian::write_u32(&mut buf[8..12], crc);
}
