// Serial frame header: payload length, sequence number and CRC32

use super::{SerialError, HEADER_LEN};
use crc32fast::Hasher;

/// Header preceding every serial frame payload
///
/// Format (8 bytes, all little-endian):
/// [2 bytes] length of the payload
/// [2 bytes] sequence number (chunk index for file transfer, 0 otherwise)
/// [4 bytes] CRC32 of the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u16,
    pub sequence: u16,
    pub crc32: u32,
}

impl FrameHeader {
    /// Build the header describing `payload`
    ///
    /// The caller bounds the payload (the link rejects anything above
    /// `MAX_PACKET_SIZE` before getting here).
    pub fn for_payload(payload: &[u8], sequence: u16) -> Self {
        debug_assert!(payload.len() <= u16::MAX as usize);
        Self {
            length: payload.len() as u16,
            sequence,
            crc32: checksum(payload),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..2].copy_from_slice(&self.length.to_le_bytes());
        buf[2..4].copy_from_slice(&self.sequence.to_le_bytes());
        buf[4..8].copy_from_slice(&self.crc32.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; HEADER_LEN]) -> Self {
        Self {
            length: u16::from_le_bytes([bytes[0], bytes[1]]),
            sequence: u16::from_le_bytes([bytes[2], bytes[3]]),
            crc32: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    /// Decode from a slice that must hold exactly one header
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SerialError> {
        let fixed: &[u8; HEADER_LEN] =
            bytes
                .try_into()
                .map_err(|_| SerialError::BufferTooShort {
                    need: HEADER_LEN,
                    got: bytes.len(),
                })?;
        Ok(Self::from_bytes(fixed))
    }

    /// Check a received payload against this header
    pub fn matches(&self, payload: &[u8]) -> bool {
        payload.len() == self.length as usize && checksum(payload) == self.crc32
    }
}

/// Encode the header for `payload` sent with sequence number `sequence`
pub fn encode_header(payload: &[u8], sequence: u16) -> [u8; HEADER_LEN] {
    FrameHeader::for_payload(payload, sequence).to_bytes()
}

/// Decode a header into (length, sequence, crc32)
pub fn decode_header(bytes: &[u8; HEADER_LEN]) -> (u16, u16, u32) {
    let header = FrameHeader::from_bytes(bytes);
    (header.length, header.sequence, header.crc32)
}

/// CRC32 (IEEE) of a payload
pub fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}
