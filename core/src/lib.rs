// Skylink Core: ground-to-spacecraft link protocols
//
// Leaf to root:
//   serial    framed, acknowledged packets over a raw byte channel
//   transfer  windowed file transfer on top of the serial link
//   state     persisted anti-replay counters
//   radio     authenticated command packets and the ground-station loop
//   telemetry beacon and ADCS decoding
//   payload   JSON command RPC to the payload computer

pub mod config;
pub mod payload;
pub mod radio;
pub mod serial;
pub mod state;
pub mod telemetry;
pub mod transfer;

pub use config::{
    AuthPolicy, BootCountPolicy, LinkConfig, RetryPolicy, StationConfig, TransferConfig,
};
pub use payload::{PayloadClient, PayloadError, PayloadReply, PayloadRequest, PayloadServer};
pub use radio::{
    Command, CommandHandler, CommandId, GroundStation, Incoming, PacketCodec, PacketError,
    PacketKey, ParsedPacket, RadioDriver, StationError,
};
pub use serial::{ByteChannel, MemoryChannel, PacketLink, SerialError, StreamChannel};
pub use state::{AntiReplayStore, BootSync, ReplayState, StateError, StateStore};
pub use telemetry::{decode_beacon, AdcsTelemetry, BeaconDecode, BeaconStats, DeviceStatus};
pub use transfer::{FileTransfer, TransferError, TransferReport};

/// Boot count a fresh ground station assumes before the first beacon
pub const DEFAULT_BOOT_COUNT: u32 = 474;
