// Authenticated command packet codec
//
// Wire layout:
//   dst:u8 src:u8 flags:u8 seq:u8 len:u8 | data[len] | boot_count:u32le msg_id:u32le | hmac[32]
// The tag covers every byte before it.

use super::{PacketError, DEFAULT_PSK, FOOTER_SIZE, HEADER_SIZE, HMAC_SIZE, MAX_DATA_SIZE};
use crate::config::AuthPolicy;
use crate::state::AntiReplayStore;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Pre-shared HMAC key, wiped on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PacketKey(Vec<u8>);

impl PacketKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_hex(encoded: &str) -> Result<Self, hex::FromHexError> {
        Ok(Self(hex::decode(encoded.trim())?))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Default for PacketKey {
    fn default() -> Self {
        Self::new(DEFAULT_PSK)
    }
}

impl fmt::Debug for PacketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PacketKey([REDACTED; {}])", self.0.len())
    }
}

/// Packet routing header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub dst: u8,
    pub src: u8,
    pub flags: u8,
    pub seq: u8,
    /// Declared data length
    pub len: u8,
}

impl PacketHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        [self.dst, self.src, self.flags, self.seq, self.len]
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < HEADER_SIZE {
            return Err(PacketError::TooShort {
                need: HEADER_SIZE,
                got: bytes.len(),
            });
        }
        Ok(Self {
            dst: bytes[0],
            src: bytes[1],
            flags: bytes[2],
            seq: bytes[3],
            len: bytes[4],
        })
    }
}

/// Anti-replay footer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub boot_count: u32,
    pub msg_id: u32,
}

impl Footer {
    pub fn to_bytes(&self) -> [u8; FOOTER_SIZE] {
        let mut out = [0u8; FOOTER_SIZE];
        out[..4].copy_from_slice(&self.boot_count.to_le_bytes());
        out[4..].copy_from_slice(&self.msg_id.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; FOOTER_SIZE]) -> Self {
        Self {
            boot_count: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            msg_id: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}

/// Result of checking a packet's tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Verified,
    /// Tag mismatch accepted under `AuthPolicy::WarnOnly`
    Failed,
    /// Authentication disabled
    Skipped,
}

/// A decoded command packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPacket {
    pub header: PacketHeader,
    pub data: Vec<u8>,
    /// Present whenever the packet is long enough to carry one
    pub footer: Option<Footer>,
    pub auth: AuthStatus,
}

/// Builds and parses authenticated packets
///
/// Each `create_packet` call takes a fresh message id from the shared
/// anti-replay store.
pub struct PacketCodec {
    key: PacketKey,
    state: Arc<AntiReplayStore>,
    auth: AuthPolicy,
}

impl PacketCodec {
    pub fn new(key: PacketKey, state: Arc<AntiReplayStore>) -> Self {
        Self {
            key,
            state,
            auth: AuthPolicy::default(),
        }
    }

    pub fn with_auth_policy(mut self, auth: AuthPolicy) -> Self {
        self.auth = auth;
        self
    }

    pub fn auth_policy(&self) -> AuthPolicy {
        self.auth
    }

    pub fn state(&self) -> &Arc<AntiReplayStore> {
        &self.state
    }

    /// Build a packet, advancing and persisting the message id
    pub fn create_packet(
        &self,
        dst: u8,
        src: u8,
        flags: u8,
        seq: u8,
        data: &[u8],
    ) -> Result<Vec<u8>, PacketError> {
        check_data_len(data)?;
        let (boot_count, msg_id) = self.state.next_footer()?;
        debug!(
            "Creating packet dst={:#04x} src={:#04x} len={} boot={} msg_id={}",
            dst,
            src,
            data.len(),
            boot_count,
            msg_id
        );
        self.encode(dst, src, flags, seq, data, Footer { boot_count, msg_id })
    }

    /// Build a packet with an explicit footer, leaving the counters alone
    pub fn encode(
        &self,
        dst: u8,
        src: u8,
        flags: u8,
        seq: u8,
        data: &[u8],
        footer: Footer,
    ) -> Result<Vec<u8>, PacketError> {
        check_data_len(data)?;
        let header = PacketHeader {
            dst,
            src,
            flags,
            seq,
            len: data.len() as u8,
        };

        let mut packet = Vec::with_capacity(HEADER_SIZE + data.len() + FOOTER_SIZE + HMAC_SIZE);
        packet.extend_from_slice(&header.to_bytes());
        packet.extend_from_slice(data);
        packet.extend_from_slice(&footer.to_bytes());
        let tag = self.tag(&packet)?;
        packet.extend_from_slice(&tag);
        Ok(packet)
    }

    /// Decode a packet and check its tag according to the auth policy
    pub fn parse_packet(&self, bytes: &[u8]) -> Result<ParsedPacket, PacketError> {
        let header = PacketHeader::from_slice(bytes)?;
        let data_end = HEADER_SIZE + header.len as usize;
        if bytes.len() < data_end {
            return Err(PacketError::TooShort {
                need: data_end,
                got: bytes.len(),
            });
        }
        let data = bytes[HEADER_SIZE..data_end].to_vec();

        let sealed_len = data_end + FOOTER_SIZE + HMAC_SIZE;
        if !self.auth.is_enabled() {
            // Footer sits right after the data when nothing else is checked
            let footer = bytes
                .get(data_end..data_end + FOOTER_SIZE)
                .and_then(|f| <&[u8; FOOTER_SIZE]>::try_from(f).ok())
                .map(Footer::from_bytes);
            return Ok(ParsedPacket {
                header,
                data,
                footer,
                auth: AuthStatus::Skipped,
            });
        }

        if bytes.len() < sealed_len {
            return Err(PacketError::TooShort {
                need: sealed_len,
                got: bytes.len(),
            });
        }

        let (signed, received) = bytes.split_at(bytes.len() - HMAC_SIZE);
        let expected = self.tag(signed)?;
        let auth = if constant_time_eq::constant_time_eq(&expected, received) {
            AuthStatus::Verified
        } else {
            match self.auth {
                AuthPolicy::WarnOnly => {
                    warn!(
                        "HMAC verification failed: received {}, computed {}",
                        hex::encode(received),
                        hex::encode(expected)
                    );
                    AuthStatus::Failed
                }
                _ => {
                    warn!(
                        "Rejecting packet from {:#04x}: HMAC verification failed",
                        header.src
                    );
                    return Err(PacketError::AuthenticationFailed);
                }
            }
        };

        let footer_start = signed.len() - FOOTER_SIZE;
        let mut footer = [0u8; FOOTER_SIZE];
        footer.copy_from_slice(&signed[footer_start..]);

        Ok(ParsedPacket {
            header,
            data,
            footer: Some(Footer::from_bytes(&footer)),
            auth,
        })
    }

    fn tag(&self, bytes: &[u8]) -> Result<[u8; HMAC_SIZE], PacketError> {
        let mut mac =
            HmacSha256::new_from_slice(self.key.as_bytes()).map_err(|_| PacketError::InvalidKey)?;
        mac.update(bytes);

        let mut tag = [0u8; HMAC_SIZE];
        tag.copy_from_slice(&mac.finalize().into_bytes());
        Ok(tag)
    }
}

fn check_data_len(data: &[u8]) -> Result<(), PacketError> {
    if data.len() > MAX_DATA_SIZE {
        return Err(PacketError::DataTooLarge {
            size: data.len(),
            max: MAX_DATA_SIZE,
        });
    }
    Ok(())
}
