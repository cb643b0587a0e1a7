// Attitude determination and control telemetry

use super::{fixed, LeReader, TelemetryError};
use serde::Serialize;

const ADCS_SIZE: usize = 25;

/// Orientation estimate
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Quaternion {
    pub q0: f32,
    pub q1: f32,
    pub q2: f32,
    pub q3: f32,
}

impl Quaternion {
    /// Euclidean norm; a healthy estimate sits near 1.0
    pub fn magnitude(&self) -> f32 {
        (self.q0 * self.q0 + self.q1 * self.q1 + self.q2 * self.q2 + self.q3 * self.q3).sqrt()
    }
}

/// ADCS record appended to the beacon: `<fffffBL`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct AdcsTelemetry {
    /// rad/s
    pub angular_velocity: f32,
    pub quaternion: Quaternion,
    pub state: u8,
    pub boot_count: u32,
}

impl AdcsTelemetry {
    pub const SIZE: usize = ADCS_SIZE;

    pub fn from_bytes(bytes: &[u8; ADCS_SIZE]) -> Self {
        let mut r = LeReader::new(bytes);
        Self {
            angular_velocity: r.f32(),
            quaternion: Quaternion {
                q0: r.f32(),
                q1: r.f32(),
                q2: r.f32(),
                q3: r.f32(),
            },
            state: r.u8(),
            boot_count: r.u32(),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, TelemetryError> {
        Ok(Self::from_bytes(fixed::<ADCS_SIZE>(bytes)?))
    }

    pub fn to_bytes(&self) -> [u8; ADCS_SIZE] {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.angular_velocity.to_le_bytes());
        out.extend_from_slice(&self.quaternion.q0.to_le_bytes());
        out.extend_from_slice(&self.quaternion.q1.to_le_bytes());
        out.extend_from_slice(&self.quaternion.q2.to_le_bytes());
        out.extend_from_slice(&self.quaternion.q3.to_le_bytes());
        out.push(self.state);
        out.extend_from_slice(&self.boot_count.to_le_bytes());

        let mut bytes = [0u8; ADCS_SIZE];
        bytes.copy_from_slice(&out);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adcs_layout() {
        let adcs = AdcsTelemetry {
            angular_velocity: 0.25,
            quaternion: Quaternion {
                q0: 1.0,
                q1: 0.0,
                q2: 0.0,
                q3: 0.0,
            },
            state: 3,
            boot_count: 474,
        };
        let bytes = adcs.to_bytes();
        assert_eq!(&bytes[..4], &0.25f32.to_le_bytes());
        assert_eq!(bytes[20], 3);
        assert_eq!(&bytes[21..], &474u32.to_le_bytes());
        assert_eq!(AdcsTelemetry::from_bytes(&bytes), adcs);
    }

    #[test]
    fn test_short_adcs() {
        assert_eq!(
            AdcsTelemetry::from_slice(&[0u8; 24]),
            Err(TelemetryError::BufferTooShort { need: 25, got: 24 })
        );
    }

    #[test]
    fn test_quaternion_magnitude() {
        let q = Quaternion {
            q0: 0.5,
            q1: 0.5,
            q2: 0.5,
            q3: 0.5,
        };
        assert!((q.magnitude() - 1.0).abs() < 1e-6);
        assert_eq!(Quaternion::default().magnitude(), 0.0);
    }
}
