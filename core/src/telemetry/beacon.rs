// Beacon telemetry decoding

use super::{fixed, AdcsTelemetry, LeReader, TelemetryError};
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

const STATS_SIZE: usize = 45;

/// Device status bitfield
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct DeviceStatus(pub u8);

impl DeviceStatus {
    pub const RBF_DETECTED: u8 = 0x01;
    pub const FIXED_SOLAR_CHARGE: u8 = 0x02;
    pub const FIXED_SOLAR_FAULT: u8 = 0x04;
    pub const PANEL_A_DEPLOYED: u8 = 0x08;
    pub const PANEL_B_DEPLOYED: u8 = 0x10;
    pub const PAYLOAD_ON: u8 = 0x20;

    const NAMES: [(u8, &'static str); 6] = [
        (Self::RBF_DETECTED, "RBF_detected"),
        (Self::FIXED_SOLAR_CHARGE, "fixed_solar_charge"),
        (Self::FIXED_SOLAR_FAULT, "fixed_solar_fault"),
        (Self::PANEL_A_DEPLOYED, "panel_A_deployed"),
        (Self::PANEL_B_DEPLOYED, "panel_B_deployed"),
        (Self::PAYLOAD_ON, "payload_on"),
    ];

    pub fn contains(&self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    /// Names of the set flags, lowest bit first
    pub fn flag_names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.flag_names();
        if names.is_empty() {
            write!(f, "{:#04x} (none)", self.0)
        } else {
            write!(f, "{:#04x} ({})", self.0, names.join(", "))
        }
    }
}

/// Fixed beacon statistics record: `<LQ6L4HB`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BeaconStats {
    pub reboot_counter: u32,
    pub time_in_state_ms: u64,
    pub rx_bytes: u32,
    pub rx_packets: u32,
    pub rx_backpressure_drops: u32,
    pub rx_bad_packet_drops: u32,
    pub tx_bytes: u32,
    pub tx_packets: u32,
    /// mV
    pub battery_voltage: u16,
    /// mA
    pub battery_current: u16,
    /// mV
    pub solar_voltage: u16,
    /// mA
    pub solar_current: u16,
    pub device_status: DeviceStatus,
}

impl BeaconStats {
    pub const SIZE: usize = STATS_SIZE;

    pub fn from_bytes(bytes: &[u8; STATS_SIZE]) -> Self {
        let mut r = LeReader::new(bytes);
        Self {
            reboot_counter: r.u32(),
            time_in_state_ms: r.u64(),
            rx_bytes: r.u32(),
            rx_packets: r.u32(),
            rx_backpressure_drops: r.u32(),
            rx_bad_packet_drops: r.u32(),
            tx_bytes: r.u32(),
            tx_packets: r.u32(),
            battery_voltage: r.u16(),
            battery_current: r.u16(),
            solar_voltage: r.u16(),
            solar_current: r.u16(),
            device_status: DeviceStatus(r.u8()),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, TelemetryError> {
        Ok(Self::from_bytes(fixed::<STATS_SIZE>(bytes)?))
    }

    pub fn to_bytes(&self) -> [u8; STATS_SIZE] {
        let mut out = Vec::with_capacity(STATS_SIZE);
        out.extend_from_slice(&self.reboot_counter.to_le_bytes());
        out.extend_from_slice(&self.time_in_state_ms.to_le_bytes());
        for counter in [
            self.rx_bytes,
            self.rx_packets,
            self.rx_backpressure_drops,
            self.rx_bad_packet_drops,
            self.tx_bytes,
            self.tx_packets,
        ] {
            out.extend_from_slice(&counter.to_le_bytes());
        }
        for reading in [
            self.battery_voltage,
            self.battery_current,
            self.solar_voltage,
            self.solar_current,
        ] {
            out.extend_from_slice(&reading.to_le_bytes());
        }
        out.push(self.device_status.0);

        let mut bytes = [0u8; STATS_SIZE];
        bytes.copy_from_slice(&out);
        bytes
    }
}

/// Something in a beacon that could not be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecodeIssue {
    /// State name was not valid UTF-8 and was decoded lossily
    InvalidStateName,
    /// Bytes followed the state name but too few for the stats block
    TruncatedStats { got: usize },
    /// Bytes followed the stats block but too few for the ADCS record
    TruncatedAdcs { got: usize },
}

impl fmt::Display for DecodeIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeIssue::InvalidStateName => write!(f, "state name is not valid UTF-8"),
            DecodeIssue::TruncatedStats { got } => {
                write!(f, "stats block truncated: need {} bytes, got {}", STATS_SIZE, got)
            }
            DecodeIssue::TruncatedAdcs { got } => write!(
                f,
                "ADCS record truncated: need {} bytes, got {}",
                AdcsTelemetry::SIZE,
                got
            ),
        }
    }
}

/// A decoded (possibly partial) beacon
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct BeaconDecode {
    pub state_name: String,
    pub stats: Option<BeaconStats>,
    pub adcs: Option<AdcsTelemetry>,
    pub issues: Vec<DecodeIssue>,
}

impl BeaconDecode {
    /// True when nothing had to be skipped or repaired
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Decode a beacon payload
///
/// Never fails: missing parts are `None`, damaged parts are reported in
/// `issues` and skipped.
pub fn decode_beacon(payload: &[u8]) -> BeaconDecode {
    let mut decode = BeaconDecode::default();

    let nul = match payload.iter().position(|&b| b == 0) {
        Some(nul) => nul,
        None => {
            debug!("Beacon has no NUL terminator, treating it as a bare state name");
            decode.state_name = state_name(payload, &mut decode.issues);
            return decode;
        }
    };
    decode.state_name = state_name(&payload[..nul], &mut decode.issues);

    let rest = &payload[nul + 1..];
    if rest.is_empty() {
        return decode;
    }

    let stats = match BeaconStats::from_slice(rest) {
        Ok(stats) => stats,
        Err(TelemetryError::BufferTooShort { need, got }) => {
            warn!("Beacon stats truncated: need {} bytes, got {}", need, got);
            decode.issues.push(DecodeIssue::TruncatedStats { got });
            return decode;
        }
    };
    decode.stats = Some(stats);

    let rest = &rest[STATS_SIZE..];
    if rest.is_empty() {
        return decode;
    }

    match AdcsTelemetry::from_slice(rest) {
        Ok(adcs) => decode.adcs = Some(adcs),
        Err(TelemetryError::BufferTooShort { need, got }) => {
            warn!("ADCS record truncated: need {} bytes, got {}", need, got);
            decode.issues.push(DecodeIssue::TruncatedAdcs { got });
        }
    }

    decode
}

/// Strip the `len:u8` prefix the satellite puts in front of each beacon
pub fn unwrap_beacon_frame(frame: &[u8]) -> Result<&[u8], TelemetryError> {
    let (&len, body) = frame
        .split_first()
        .ok_or(TelemetryError::BufferTooShort { need: 1, got: 0 })?;
    body.get(..len as usize)
        .ok_or(TelemetryError::BufferTooShort {
            need: 1 + len as usize,
            got: frame.len(),
        })
}

fn state_name(bytes: &[u8], issues: &mut Vec<DecodeIssue>) -> String {
    match std::str::from_utf8(bytes) {
        Ok(name) => name.to_string(),
        Err(_) => {
            issues.push(DecodeIssue::InvalidStateName);
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> BeaconStats {
        BeaconStats {
            reboot_counter: 42,
            time_in_state_ms: 10_000,
            rx_bytes: 100,
            rx_packets: 10,
            tx_bytes: 200,
            tx_packets: 20,
            battery_voltage: 4000,
            battery_current: 100,
            solar_voltage: 5000,
            solar_current: 500,
            device_status: DeviceStatus(0x01),
            ..BeaconStats::default()
        }
    }

    #[test]
    fn test_stats_layout() {
        let bytes = stats().to_bytes();
        assert_eq!(&bytes[..4], &42u32.to_le_bytes());
        assert_eq!(&bytes[4..12], &10_000u64.to_le_bytes());
        assert_eq!(&bytes[36..38], &4000u16.to_le_bytes());
        assert_eq!(bytes[44], 0x01);
        assert_eq!(BeaconStats::from_bytes(&bytes), stats());
    }

    #[test]
    fn test_decode_stats_only() {
        let mut payload = b"idle\0".to_vec();
        payload.extend_from_slice(&stats().to_bytes());

        let decode = decode_beacon(&payload);
        assert_eq!(decode.state_name, "idle");
        let stats = decode.stats.unwrap();
        assert_eq!(stats.reboot_counter, 42);
        assert_eq!(stats.battery_voltage, 4000);
        assert!(decode.adcs.is_none());
        assert!(decode.is_clean());
    }

    #[test]
    fn test_decode_with_adcs() {
        let adcs = AdcsTelemetry {
            angular_velocity: 0.1,
            state: 2,
            boot_count: 42,
            ..AdcsTelemetry::default()
        };
        let mut payload = b"detumble\0".to_vec();
        payload.extend_from_slice(&stats().to_bytes());
        payload.extend_from_slice(&adcs.to_bytes());

        let decode = decode_beacon(&payload);
        assert!(decode.stats.is_some());
        assert_eq!(decode.adcs, Some(adcs));
    }

    #[test]
    fn test_name_only_is_not_an_issue() {
        let decode = decode_beacon(b"safe\0");
        assert_eq!(decode.state_name, "safe");
        assert!(decode.stats.is_none());
        assert!(decode.is_clean());

        let decode = decode_beacon(b"no-terminator");
        assert_eq!(decode.state_name, "no-terminator");
        assert!(decode.stats.is_none());
        assert!(decode.is_clean());
    }

    #[test]
    fn test_truncation_is_reported() {
        let mut payload = b"idle\0".to_vec();
        payload.extend_from_slice(&[0u8; 20]);
        let decode = decode_beacon(&payload);
        assert!(decode.stats.is_none());
        assert_eq!(decode.issues, vec![DecodeIssue::TruncatedStats { got: 20 }]);

        let mut payload = b"idle\0".to_vec();
        payload.extend_from_slice(&stats().to_bytes());
        payload.extend_from_slice(&[0u8; 10]);
        let decode = decode_beacon(&payload);
        assert!(decode.stats.is_some());
        assert!(decode.adcs.is_none());
        assert_eq!(decode.issues, vec![DecodeIssue::TruncatedAdcs { got: 10 }]);
    }

    #[test]
    fn test_invalid_utf8_name() {
        let decode = decode_beacon(b"id\xFFle\0");
        assert_eq!(decode.state_name, "id\u{FFFD}le");
        assert_eq!(decode.issues, vec![DecodeIssue::InvalidStateName]);
    }

    #[test]
    fn test_device_status_names() {
        let status = DeviceStatus(0x01 | 0x08 | 0x20);
        assert_eq!(
            status.flag_names(),
            vec!["RBF_detected", "panel_A_deployed", "payload_on"]
        );
        assert_eq!(DeviceStatus(0).to_string(), "0x00 (none)");
    }

    #[test]
    fn test_unwrap_beacon_frame() {
        assert_eq!(unwrap_beacon_frame(&[3, b'a', b'b', b'c', 9]).unwrap(), b"abc");
        assert_eq!(
            unwrap_beacon_frame(&[5, 1, 2]),
            Err(TelemetryError::BufferTooShort { need: 6, got: 3 })
        );
        assert!(unwrap_beacon_frame(&[]).is_err());
    }
}
