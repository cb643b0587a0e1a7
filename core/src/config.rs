// Link policy: retry ceilings, timeouts and authentication rules
//
// Every bounded wait and every retry count used by the protocol stack lives here,
// so a deployment can tune a noisy link without touching call sites.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded retry loop: at most `max_attempts` tries, sleeping `backoff` between them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Retry without sleeping between attempts
    pub const fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Sleep between attempts (no-op for a zero backoff)
    pub fn pause(&self) {
        if !self.backoff.is_zero() {
            std::thread::sleep(self.backoff);
        }
    }
}

/// Serial byte-link transport settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Sync handshake retries (default: 3 attempts, 100 ms apart)
    pub sync_retry: RetryPolicy,
    /// How long a writer waits for each ACK byte
    #[serde(with = "millis")]
    pub ack_timeout: Duration,
    /// Bound on each header/payload read once a frame has started
    #[serde(with = "millis")]
    pub byte_timeout: Duration,
    /// How long a reader waits for the next sync byte before reporting "no data"
    #[serde(with = "millis")]
    pub sync_timeout: Duration,
    /// Non-marker bytes tolerated before the start marker
    pub start_marker_scan_limit: u32,
    /// Largest payload accepted in either direction
    pub max_packet_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            sync_retry: RetryPolicy::new(3, Duration::from_millis(100)),
            ack_timeout: Duration::from_secs(1),
            byte_timeout: Duration::from_secs(1),
            sync_timeout: Duration::from_secs(10),
            start_marker_scan_limit: 10,
            max_packet_size: crate::serial::MAX_PACKET_SIZE,
        }
    }
}

/// Windowed file transfer settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Bytes per chunk (one frame payload)
    pub chunk_size: usize,
    /// Chunks sent before the sender asks for a missing list
    pub group_size: u32,
    /// Missing-list requests before the receiver is declared unresponsive
    pub ack_retry: RetryPolicy,
    /// Resend rounds per group before the transfer aborts
    pub max_resend_cycles: u32,
    /// Consecutive bad packets before the receiver aborts
    pub max_bad_packets: u32,
    /// Pause after announcing the chunk count
    #[serde(with = "millis")]
    pub settle_delay: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::transfer::CHUNK_SIZE,
            group_size: crate::transfer::GROUP_SIZE,
            ack_retry: RetryPolicy::immediate(3),
            max_resend_cycles: 3,
            max_bad_packets: 3,
            settle_delay: Duration::from_millis(500),
        }
    }
}

/// What a failed HMAC check does to an inbound command packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPolicy {
    /// Reject the packet (operational default)
    #[default]
    Enforce,
    /// Log the mismatch and hand the packet up anyway (bench diagnostics)
    WarnOnly,
    /// Do not split off or check a trailer at all
    Disabled,
}

impl AuthPolicy {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, AuthPolicy::Disabled)
    }
}

/// What a beacon reporting a *lower* boot count does to the anti-replay state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootCountPolicy {
    /// Treat the satellite as authoritative and adopt the lower count (logged as an anomaly)
    #[default]
    AdoptLower,
    /// Keep the stored count and report the anomaly
    RejectLower,
}

/// Ground-station radio loop settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationConfig {
    /// Our link-layer node address
    pub ground_node: u8,
    /// Link-layer node address the satellite transmits beacons from
    pub satellite_node: u8,
    /// Link-layer destination for uplinked commands
    pub broadcast: u8,
    /// How long each poll waits on the radio
    #[serde(with = "millis")]
    pub poll_timeout: Duration,
    pub auth: AuthPolicy,
    /// Adopt the satellite's reboot counter from decoded beacons
    pub sync_boot_from_beacons: bool,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            ground_node: 0x00,
            satellite_node: 0x00,
            broadcast: 0xFF,
            poll_timeout: Duration::from_millis(100),
            auth: AuthPolicy::default(),
            sync_boot_from_beacons: true,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_link_config() {
        let config = LinkConfig::default();
        assert_eq!(config.sync_retry.max_attempts, 3);
        assert_eq!(config.sync_retry.backoff, Duration::from_millis(100));
        assert_eq!(config.start_marker_scan_limit, 10);
        assert_eq!(config.max_packet_size, 4096);
    }

    #[test]
    fn test_default_transfer_config() {
        let config = TransferConfig::default();
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.group_size, 32);
        assert_eq!(config.ack_retry.max_attempts, 3);
        assert_eq!(config.max_resend_cycles, 3);
        assert_eq!(config.max_bad_packets, 3);
    }

    #[test]
    fn test_config_serialization() {
        let config = LinkConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"ack_timeout\":1000"));
        let deserialized: LinkConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_policy_names() {
        assert_eq!(
            serde_json::to_string(&AuthPolicy::WarnOnly).unwrap(),
            "\"warn_only\""
        );
        assert_eq!(
            serde_json::from_str::<BootCountPolicy>("\"reject_lower\"").unwrap(),
            BootCountPolicy::RejectLower
        );
        assert!(!AuthPolicy::Disabled.is_enabled());
        assert!(AuthPolicy::Enforce.is_enabled());
    }
}
