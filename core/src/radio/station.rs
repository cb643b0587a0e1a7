// Ground-station side of the radio link
//
// Uplink: authenticated command packets. Downlink: beacons from the satellite
// node (`len:u8 ‖ beacon`, unauthenticated) and authenticated responses from
// any other node.

use super::{Command, LinkHeader, PacketCodec, PacketError, ParsedPacket, RadioDriver, RadioFrame};
use crate::config::StationConfig;
use crate::state::{BootSync, StateError};
use crate::telemetry::{decode_beacon, unwrap_beacon_frame, BeaconDecode};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Source address the ground station writes into command packets
pub const GROUND_PACKET_SOURCE: u8 = 0xFF;

/// Ground station errors
///
/// Bad downlink frames are not errors; they come back as `Incoming::Undecodable`.
#[derive(Debug, Error)]
pub enum StationError {
    #[error("Radio error: {0}")]
    Radio(#[from] std::io::Error),

    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("State error: {0}")]
    State(#[from] StateError),
}

/// A classified downlink frame
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Beacon {
        rssi: i16,
        beacon: BeaconDecode,
        /// Outcome of syncing our boot count, when the beacon carried stats
        boot_sync: Option<BootSync>,
    },
    Response {
        source_node: u8,
        rssi: i16,
        packet: ParsedPacket,
    },
    Undecodable {
        source_node: u8,
        rssi: i16,
        reason: String,
        raw: Vec<u8>,
    },
}

/// Command uplink and telemetry downlink over one radio
pub struct GroundStation<D: RadioDriver> {
    radio: D,
    codec: PacketCodec,
    config: StationConfig,
}

impl<D: RadioDriver> GroundStation<D> {
    pub fn new(radio: D, codec: PacketCodec, config: StationConfig) -> Self {
        let codec = codec.with_auth_policy(config.auth);
        Self {
            radio,
            codec,
            config,
        }
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn codec(&self) -> &PacketCodec {
        &self.codec
    }

    pub fn radio_mut(&mut self) -> &mut D {
        &mut self.radio
    }

    /// Build, sign and transmit `command` for packet destination `dst`
    ///
    /// Returns the packet as sent.
    pub fn send_command(&mut self, command: &Command, dst: u8) -> Result<Vec<u8>, StationError> {
        let data = command.to_data()?;
        let packet = self
            .codec
            .create_packet(dst, GROUND_PACKET_SOURCE, 0x00, 0x00, &data)?;

        let header = LinkHeader {
            destination: self.config.broadcast,
            node: self.config.ground_node,
            identifier: 0,
            flags: 0,
        };
        self.radio.send(&packet, header)?;

        info!("Sent {} ({} bytes) to {:#04x}", command, packet.len(), dst);
        debug!("Packet dump: {}", hex::encode(&packet));
        Ok(packet)
    }

    /// Wait up to the poll timeout for one frame and classify it
    pub fn poll(&mut self) -> Result<Option<Incoming>, StationError> {
        let frame = match self.radio.receive(self.config.poll_timeout)? {
            Some(frame) => frame,
            None => return Ok(None),
        };
        debug!(
            "Frame from node {} to {} (id {}, flags {:#04x}, rssi {} dBm, {} bytes)",
            frame.source_node,
            frame.destination_node,
            frame.identifier,
            frame.flags,
            frame.rssi,
            frame.payload.len()
        );

        if frame.source_node == self.config.satellite_node {
            self.handle_beacon(frame).map(Some)
        } else {
            Ok(Some(self.handle_response(frame)))
        }
    }

    fn handle_beacon(&mut self, frame: RadioFrame) -> Result<Incoming, StationError> {
        let body = match unwrap_beacon_frame(&frame.payload) {
            Ok(body) => body,
            Err(e) => {
                warn!("Dropping beacon frame: {}", e);
                return Ok(Incoming::Undecodable {
                    source_node: frame.source_node,
                    rssi: frame.rssi,
                    reason: e.to_string(),
                    raw: frame.payload,
                });
            }
        };

        let beacon = decode_beacon(body);
        info!("Beacon: state '{}' (rssi {} dBm)", beacon.state_name, frame.rssi);
        for issue in &beacon.issues {
            warn!("Beacon decode issue: {}", issue);
        }

        let boot_sync = match (&beacon.stats, self.config.sync_boot_from_beacons) {
            (Some(stats), true) => Some(
                self.codec
                    .state()
                    .sync_boot_count(stats.reboot_counter)?,
            ),
            _ => None,
        };

        Ok(Incoming::Beacon {
            rssi: frame.rssi,
            beacon,
            boot_sync,
        })
    }

    fn handle_response(&mut self, frame: RadioFrame) -> Incoming {
        match self.codec.parse_packet(&frame.payload) {
            Ok(packet) => {
                info!(
                    "Response from node {}: {} data bytes",
                    frame.source_node,
                    packet.data.len()
                );
                Incoming::Response {
                    source_node: frame.source_node,
                    rssi: frame.rssi,
                    packet,
                }
            }
            Err(e) => {
                warn!(
                    "Undecodable response from node {} ({} bytes): {}",
                    frame.source_node,
                    frame.payload.len(),
                    e
                );
                Incoming::Undecodable {
                    source_node: frame.source_node,
                    rssi: frame.rssi,
                    reason: e.to_string(),
                    raw: frame.payload,
                }
            }
        }
    }
}
