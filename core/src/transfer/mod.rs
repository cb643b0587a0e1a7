//! Windowed file transfer over a PacketLink
//!
//! A file moves as fixed-size chunks (one frame each, sequence number = chunk
//! index) grouped into acknowledgement windows. After each group the sender
//! asks for the receiver's missing list and resends exactly those chunks, so
//! recovery granularity is one group rather than the whole file.
//!
//! Control messages travel as ordinary frame payloads:
//! - first message: chunk count, 4 bytes big-endian
//! - `!SEND_ACK!`: request the missing list (reply is a JSON array of indices)
//! - `!ABORT!`: terminate the transfer unilaterally

pub mod receiver;
pub mod sender;
pub mod window;

pub use receiver::ChunkSink;
pub use window::TransferWindow;

use crate::config::TransferConfig;
use crate::serial::{ByteChannel, PacketLink, SerialError};
use serde::Serialize;
use thiserror::Error;

/// Bytes per chunk
pub const CHUNK_SIZE: usize = 1024;

/// Chunks per acknowledgement window
pub const GROUP_SIZE: u32 = 32;

/// Sentinel asking the receiver for its missing list
pub const SEND_ACK: &[u8] = b"!SEND_ACK!";

/// Sentinel terminating the transfer
pub const ABORT: &[u8] = b"!ABORT!";

/// Chunk indices travel as 16-bit frame sequence numbers
pub const MAX_CHUNKS: u64 = u16::MAX as u64 + 1;

/// File transfer errors
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Link error: {0}")]
    Link(#[from] SerialError),

    #[error("File IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File too large: {chunks} chunks (max {MAX_CHUNKS})")]
    FileTooLarge { chunks: u64 },

    #[error("Chunk count was not acknowledged by the receiver")]
    CountNotAcknowledged,

    #[error("No chunk count received")]
    MissingChunkCount,

    #[error("Malformed chunk count: expected 4 bytes, got {0}")]
    MalformedChunkCount(usize),

    #[error("Receiver unresponsive after {attempts} missing-list requests")]
    ReceiverUnresponsive { attempts: u32 },

    #[error("Chunks still missing after {cycles} resend cycles: {missing:?}")]
    ResendCyclesExhausted { cycles: u32, missing: Vec<u32> },

    #[error("Transfer aborted by peer")]
    AbortedByPeer,

    #[error("Too many consecutive bad packets ({0})")]
    TooManyBadPackets(u32),
}

/// Summary of a completed transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    pub total_chunks: u32,
    pub bytes: u64,
    /// Chunks sent (or received) more than once
    pub resent_chunks: u32,
    /// Missing-list exchanges completed
    pub reconciliations: u32,
}

/// One end of a file transfer, borrowing an established link
///
/// Sending lives in `sender.rs`, receiving in `receiver.rs`.
pub struct FileTransfer<'a, C> {
    link: &'a mut PacketLink<C>,
    config: TransferConfig,
}

impl<'a, C: ByteChannel> FileTransfer<'a, C> {
    pub fn new(link: &'a mut PacketLink<C>) -> Self {
        Self::with_config(link, TransferConfig::default())
    }

    pub fn with_config(link: &'a mut PacketLink<C>, config: TransferConfig) -> Self {
        Self { link, config }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }
}

/// Number of chunks needed for `len` bytes
pub fn chunk_count(len: u64, chunk_size: usize) -> u64 {
    len.div_ceil(chunk_size.max(1) as u64)
}

/// Decode the chunk-count control message that opens a transfer
pub fn parse_chunk_count(payload: &[u8]) -> Result<u32, TransferError> {
    let bytes: [u8; 4] = payload
        .try_into()
        .map_err(|_| TransferError::MalformedChunkCount(payload.len()))?;
    let total = u32::from_be_bytes(bytes);
    if total as u64 > MAX_CHUNKS {
        return Err(TransferError::FileTooLarge {
            chunks: total as u64,
        });
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0, CHUNK_SIZE), 0);
        assert_eq!(chunk_count(1, CHUNK_SIZE), 1);
        assert_eq!(chunk_count(1024, CHUNK_SIZE), 1);
        assert_eq!(chunk_count(1025, CHUNK_SIZE), 2);
        assert_eq!(chunk_count(32 * 1024, CHUNK_SIZE), 32);
    }

    #[test]
    fn test_parse_chunk_count() {
        assert_eq!(parse_chunk_count(&[0, 0, 1, 2]).unwrap(), 258);
        assert!(matches!(
            parse_chunk_count(&[0, 1, 0, 1]),
            Err(TransferError::FileTooLarge { chunks: 65537 })
        ));
        assert!(matches!(
            parse_chunk_count(b"[true,1]"),
            Err(TransferError::MalformedChunkCount(8))
        ));
    }

    #[test]
    fn test_sentinels_are_distinct_from_counts() {
        // A 4-byte count can never collide with either sentinel
        assert_ne!(SEND_ACK.len(), 4);
        assert_ne!(ABORT.len(), 4);
        assert_ne!(SEND_ACK, ABORT);
    }
}
