// Packet link: the acknowledged framing handshake over a ByteChannel

use super::channel::ByteChannel;
use super::frame::FrameHeader;
use super::{SerialError, ACK_BYTE, HEADER_LEN, START_MARKER, SYNC_BYTE, SYNC_COUNT};
use crate::config::LinkConfig;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::debug;

/// A payload that passed length and CRC verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPacket {
    pub payload: Vec<u8>,
    pub sequence: u16,
}

/// Link-quality counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    /// Writes abandoned because a sync, header or payload ACK never came
    pub unacknowledged: u64,
    /// Reads that saw no sync run before the sync timeout
    pub sync_timeouts: u64,
    /// Frames whose start marker, header or payload arrived short
    pub short_reads: u64,
    pub crc_failures: u64,
    pub oversize_rejections: u64,
}

/// One end of a framed serial link
///
/// Strictly request/response: each call performs one blocking exchange and the
/// two ends alternate. Not reentrant; a link is owned by a single caller.
pub struct PacketLink<C> {
    channel: C,
    config: LinkConfig,
    stats: LinkStats,
}

impl<C: ByteChannel> PacketLink<C> {
    pub fn new(channel: C) -> Self {
        Self::with_config(channel, LinkConfig::default())
    }

    pub fn with_config(channel: C, config: LinkConfig) -> Self {
        Self {
            channel,
            config,
            stats: LinkStats::default(),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn into_inner(self) -> C {
        self.channel
    }

    /// Send one framed payload
    ///
    /// Returns `Ok(true)` once the receiver acknowledged the payload and
    /// `Ok(false)` when any stage of the handshake went unacknowledged; the
    /// caller decides whether to retry. Oversized payloads are rejected before
    /// anything is written.
    pub fn write_packet(&mut self, payload: &[u8], sequence: u16) -> Result<bool, SerialError> {
        if payload.len() > self.config.max_packet_size {
            return Err(SerialError::PacketTooLarge {
                size: payload.len(),
                max: self.config.max_packet_size,
            });
        }

        let header = FrameHeader::for_payload(payload, sequence);
        let retry = self.config.sync_retry;

        let mut synced = false;
        for attempt in 1..=retry.max_attempts {
            debug!("Sending sync (attempt {}/{})", attempt, retry.max_attempts);
            self.channel.write_all(&[SYNC_BYTE; SYNC_COUNT])?;
            if self.receive_ack()? {
                synced = true;
                break;
            }
            retry.pause();
        }

        if !synced {
            debug!(
                "Sync was not acknowledged after {} attempts (seq {})",
                retry.max_attempts, sequence
            );
            self.stats.unacknowledged += 1;
            return Ok(false);
        }

        self.channel.write_all(&[START_MARKER])?;
        debug!(
            "Writing header (len {}, seq {}, crc {:#010x})",
            header.length, header.sequence, header.crc32
        );
        self.channel.write_all(&header.to_bytes())?;

        if !self.receive_ack()? {
            debug!("Header was not acknowledged (seq {})", sequence);
            self.stats.unacknowledged += 1;
            return Ok(false);
        }

        debug!("Writing {} payload bytes", payload.len());
        self.channel.write_all(payload)?;

        let acked = self.receive_ack()?;
        if acked {
            self.stats.frames_sent += 1;
        } else {
            debug!("Payload was not acknowledged (seq {})", sequence);
            self.stats.unacknowledged += 1;
        }
        Ok(acked)
    }

    /// Receive one framed payload
    ///
    /// Returns `Ok(None)` for every lossy-link outcome: no sync, no start
    /// marker, short header or payload, oversized length, CRC mismatch. Only
    /// channel faults are errors.
    pub fn read_packet(&mut self) -> Result<Option<ReceivedPacket>, SerialError> {
        debug!("Waiting for sync...");
        if !self.wait_for_sync()? {
            debug!("No sync arrived");
            self.stats.sync_timeouts += 1;
            return Ok(None);
        }
        self.send_ack()?;

        if !self.wait_for_start_marker()? {
            debug!(
                "Start marker not seen within {} bytes",
                self.config.start_marker_scan_limit
            );
            self.stats.short_reads += 1;
            return Ok(None);
        }

        let raw = self.read_up_to(HEADER_LEN, self.config.byte_timeout)?;
        if raw.len() < HEADER_LEN {
            debug!(
                "Did not receive header: expected {} bytes, got {}",
                HEADER_LEN,
                raw.len()
            );
            self.stats.short_reads += 1;
            return Ok(None);
        }
        let header = FrameHeader::from_slice(&raw)?;

        if header.length as usize > self.config.max_packet_size {
            debug!(
                "Invalid packet length ({} > {})",
                header.length, self.config.max_packet_size
            );
            self.stats.oversize_rejections += 1;
            return Ok(None);
        }
        self.send_ack()?;

        debug!(
            "Reading {} bytes (#{}, crc = {:#010x})",
            header.length, header.sequence, header.crc32
        );
        let payload = self.read_up_to(header.length as usize, self.config.byte_timeout)?;
        if payload.len() < header.length as usize {
            debug!(
                "Reading payload timed out: expected {} bytes, got {}",
                header.length,
                payload.len()
            );
            self.stats.short_reads += 1;
            return Ok(None);
        }

        if !header.matches(&payload) {
            debug!(
                "Invalid crc checksum on #{} (expected {:#010x}, got {:#010x})",
                header.sequence,
                header.crc32,
                super::frame::checksum(&payload)
            );
            self.stats.crc_failures += 1;
            return Ok(None);
        }

        debug!("Received valid packet #{}, sending ack", header.sequence);
        self.send_ack()?;
        self.stats.frames_received += 1;

        Ok(Some(ReceivedPacket {
            payload,
            sequence: header.sequence,
        }))
    }

    fn send_ack(&mut self) -> Result<(), SerialError> {
        self.channel.write_all(&[ACK_BYTE])?;
        Ok(())
    }

    fn receive_ack(&mut self) -> Result<bool, SerialError> {
        let mut byte = [0u8; 1];
        let n = self.channel.read_timeout(&mut byte, self.config.ack_timeout)?;
        Ok(n == 1 && byte[0] == ACK_BYTE)
    }

    /// Consume bytes until a run of `SYNC_COUNT` sync bytes; any other byte resets the run
    fn wait_for_sync(&mut self) -> Result<bool, SerialError> {
        let mut count = 0;
        let mut byte = [0u8; 1];

        loop {
            if self.channel.read_timeout(&mut byte, self.config.sync_timeout)? == 0 {
                return Ok(false);
            }

            if byte[0] == SYNC_BYTE {
                count += 1;
            } else {
                count = 0;
            }

            if count == SYNC_COUNT {
                return Ok(true);
            }
        }
    }

    /// Skip leftover sync bytes (from writer retries) up to the start marker
    fn wait_for_start_marker(&mut self) -> Result<bool, SerialError> {
        let mut byte = [0u8; 1];
        let mut skipped = 0;

        loop {
            let n = self
                .channel
                .read_timeout(&mut byte, self.config.byte_timeout)?;
            if n == 1 && byte[0] == START_MARKER {
                return Ok(true);
            }

            skipped += 1;
            if skipped >= self.config.start_marker_scan_limit {
                return Ok(false);
            }
        }
    }

    /// Read up to `len` bytes, stopping early once `timeout` has elapsed
    fn read_up_to(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>, SerialError> {
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        let deadline = Instant::now() + timeout;

        while filled < len {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let n = self.channel.read_timeout(&mut buf[filled..], remaining)?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        buf.truncate(filled);
        Ok(buf)
    }
}
