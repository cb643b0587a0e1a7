//! Radio link: authenticated command packets, command set, driver seam and
//! the ground-station receive/command loop.

pub mod command;
pub mod driver;
pub mod packet;
pub mod station;

pub use command::{Command, CommandHandler, CommandId};
pub use driver::{LinkHeader, MemoryRadio, RadioDriver, RadioFrame};
pub use packet::{AuthStatus, Footer, PacketCodec, PacketHeader, PacketKey, ParsedPacket};
pub use station::{GroundStation, Incoming, StationError};

use thiserror::Error;

/// dst, src, flags, seq, len
pub const HEADER_SIZE: usize = 5;
/// boot_count (u32 le), msg_id (u32 le)
pub const FOOTER_SIZE: usize = 8;
/// HMAC-SHA256 tag
pub const HMAC_SIZE: usize = 32;
/// Largest packet the radio accepts
pub const MAX_PACKET_LEN: usize = 255;
/// Largest data field that still fits header, footer and tag
pub const MAX_DATA_SIZE: usize = MAX_PACKET_LEN - HEADER_SIZE - FOOTER_SIZE - HMAC_SIZE;

/// Pre-shared key the flight software ships with
pub const DEFAULT_PSK: &[u8] = b"0M09De7LOHdzMVPIYpYo4NsFOI9rTUz1";

/// Command packet errors
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("Data too large: {size} bytes (max {max})")]
    DataTooLarge { size: usize, max: usize },

    #[error("Packet too short: need {need} bytes, got {got}")]
    TooShort { need: usize, got: usize },

    #[error("HMAC verification failed")]
    AuthenticationFailed,

    #[error("Invalid HMAC key")]
    InvalidKey,

    #[error("Unknown command id {0}")]
    UnknownCommand(u8),

    #[error("Command argument is not UTF-8")]
    InvalidArgument,

    #[error("Empty command data")]
    EmptyCommand,

    #[error("Anti-replay state error: {0}")]
    State(#[from] crate::state::StateError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_budget() {
        assert_eq!(MAX_DATA_SIZE, 210);
        assert_eq!(DEFAULT_PSK.len(), 32);
    }
}
