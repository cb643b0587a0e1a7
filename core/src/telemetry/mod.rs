//! Satellite telemetry decoding
//!
//! Beacons arrive as `state_name \0 BeaconStats(45B) [AdcsTelemetry(25B)]`.
//! Decoding never fails outright: malformed input degrades to a partial
//! result carrying `DecodeIssue`s so the receive loop keeps running.

pub mod adcs;
pub mod beacon;

pub use adcs::{AdcsTelemetry, Quaternion};
pub use beacon::{
    decode_beacon, unwrap_beacon_frame, BeaconDecode, BeaconStats, DecodeIssue, DeviceStatus,
};

use thiserror::Error;

/// Errors for fixed-layout records taken from a byte slice
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("Buffer too short: need {need} bytes, got {got}")]
    BufferTooShort { need: usize, got: usize },
}

/// Little-endian field reader over a fixed-size record
pub(crate) struct LeReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> LeReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    pub(crate) fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    pub(crate) fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    pub(crate) fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    pub(crate) fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    pub(crate) fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }
}

/// Take the fixed-size prefix of `bytes` or report how short it is
pub(crate) fn fixed<const N: usize>(bytes: &[u8]) -> Result<&[u8; N], TelemetryError> {
    bytes
        .get(..N)
        .and_then(|prefix| prefix.try_into().ok())
        .ok_or(TelemetryError::BufferTooShort {
            need: N,
            got: bytes.len(),
        })
}
