//! Serial byte-link: framed, acknowledged packets over a raw duplex byte stream
//!
//! This module provides:
//! - FrameHeader: fixed 8-byte header (length, sequence, CRC32), little-endian
//! - ByteChannel: the bounded-read duplex stream the link runs on
//! - PacketLink: sync → ack → header → ack → payload → ack handshake
//!
//! Wire format per frame:
//! `[sync]*3 [start=0x40] header(8B: len:u16le, seq:u16le, crc32:u32le) payload(len bytes)`
//! with a standalone ACK byte (`0x21`) after the sync run, the header and the payload.

pub mod channel;
pub mod frame;
pub mod link;

pub use channel::{ByteChannel, MemoryChannel, StreamChannel};
pub use frame::{decode_header, encode_header, FrameHeader};
pub use link::{LinkStats, PacketLink, ReceivedPacket};

use thiserror::Error;

/// Header length in bytes
pub const HEADER_LEN: usize = 8;

/// Maximum payload carried by one frame
pub const MAX_PACKET_SIZE: usize = 4096;

/// Acknowledgement byte ("!")
pub const ACK_BYTE: u8 = b'!';

/// Sync byte ("$"), sent as a run of `SYNC_COUNT`
pub const SYNC_BYTE: u8 = b'$';

/// Consecutive sync bytes that open a frame
pub const SYNC_COUNT: usize = 3;

/// Start marker ("@") between the sync run and the header
pub const START_MARKER: u8 = 0x40;

/// Serial link errors
///
/// Lossy-link outcomes (timeouts, CRC mismatch, missing ACKs) are not errors:
/// they surface as `Ok(None)` / `Ok(false)` from the link.
#[derive(Debug, Error)]
pub enum SerialError {
    #[error("Packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Buffer too short: need {need} bytes, got {got}")]
    BufferTooShort { need: usize, got: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
