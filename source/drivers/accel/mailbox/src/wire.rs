// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Mailbox wire format (16-byte message header + word-padded payload)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 4 unit tests
//!
//! LAYOUT (little-endian u32 words):
//!   - word 0: total_size (payload bytes, header excluded)
//!   - word 1: size[10:0] | rsvd[15:11] | protocol_version[23:16] | rsvd[31:24]
//!   - word 2: id (tagged request id, or >= ASYNC_MSG_START_ID for device events)
//!   - word 3: opcode

use accel_hal::WORD;

/// Header length in bytes.
pub const HEADER_SIZE: usize = 16;

/// Protocol version stamped into every outbound header.
pub const MSG_PROTOCOL_VERSION: u8 = 0x1;

/// Marker telling the reader to continue at ring offset 0.
/// Never valid as the first word of a message.
pub const TOMBSTONE: u32 = 0xDEAD_FACE;

/// Inbound ids at or above this value are device-originated async events.
pub const ASYNC_MSG_START_ID: u32 = 0x8000_0000;

const SIZE_MASK: u32 = 0x7ff;
const VERSION_SHIFT: u32 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MsgHeader {
    pub total_size: u32,
    /// 11-bit size field as carried on the wire.
    pub size: u16,
    pub protocol_version: u8,
    pub id: u32,
    pub opcode: u32,
}

impl MsgHeader {
    /// Header for an unfragmented message carrying `len` payload bytes.
    pub fn new(opcode: u32, id: u32, len: u32) -> Self {
        Self {
            total_size: len,
            size: (len & SIZE_MASK) as u16,
            protocol_version: MSG_PROTOCOL_VERSION,
            id,
            opcode,
        }
    }

    pub fn is_async(&self) -> bool {
        self.id >= ASYNC_MSG_START_ID
    }

    /// Payload length in bytes. `total_size` is authoritative since fragmentation is unsupported.
    pub fn payload_len(&self) -> usize {
        self.total_size as usize
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let packed = (u32::from(self.size) & SIZE_MASK)
            | (u32::from(self.protocol_version) << VERSION_SHIFT);
        let mut out = [0u8; HEADER_SIZE];
        for (slot, word) in out
            .chunks_exact_mut(WORD)
            .zip([self.total_size, packed, self.id, self.opcode])
        {
            slot.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(raw: &[u8; HEADER_SIZE]) -> Self {
        let word = |i: usize| {
            u32::from_le_bytes([raw[i * WORD], raw[i * WORD + 1], raw[i * WORD + 2], raw[i * WORD + 3]])
        };
        let packed = word(1);
        Self {
            total_size: word(0),
            size: (packed & SIZE_MASK) as u16,
            protocol_version: (packed >> VERSION_SHIFT) as u8,
            id: word(2),
            opcode: word(3),
        }
    }
}

/// First little-endian word of `payload`, if it has one.
pub fn first_word(payload: &[u8]) -> Option<u32> {
    payload
        .get(..WORD)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_matches_wire() {
        let hdr = MsgHeader::new(0x11, 0x1d00_0005, 8);
        let raw = hdr.to_bytes();
        assert_eq!(&raw[0..4], &8u32.to_le_bytes());
        assert_eq!(&raw[4..8], &(8u32 | 1 << 16).to_le_bytes());
        assert_eq!(&raw[8..12], &0x1d00_0005u32.to_le_bytes());
        assert_eq!(&raw[12..16], &0x11u32.to_le_bytes());
    }

    #[test]
    fn decode_ignores_reserved_bits() {
        let mut raw = MsgHeader::new(1, 2, 4).to_bytes();
        raw[5] |= 0xf8; // rsvd0
        raw[7] = 0xff; // rsvd1
        let hdr = MsgHeader::from_bytes(&raw);
        assert_eq!(hdr.size, 4);
        assert_eq!(hdr.protocol_version, MSG_PROTOCOL_VERSION);
    }

    #[test]
    fn size_field_is_eleven_bits() {
        let hdr = MsgHeader::new(1, 2, 0x800 + 12);
        assert_eq!(hdr.size, 12);
        assert_eq!(hdr.payload_len(), 0x800 + 12);
        assert_eq!(MsgHeader::from_bytes(&hdr.to_bytes()).total_size, 0x80c);
    }

    #[test]
    fn async_boundary() {
        assert!(!MsgHeader::new(0, ASYNC_MSG_START_ID - 1, 0).is_async());
        assert!(MsgHeader::new(0, ASYNC_MSG_START_ID, 0).is_async());
        assert_eq!(first_word(&TOMBSTONE.to_le_bytes()), Some(TOMBSTONE));
        assert_eq!(first_word(&[1, 2]), None);
    }
}
