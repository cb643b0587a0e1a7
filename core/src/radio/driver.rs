// Physical radio seam
//
// The radio hardware is a black box: it sends a payload with a small
// addressing header and hands back received frames with link-layer metadata.

use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// Addressing header the radio prepends on send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkHeader {
    pub destination: u8,
    pub node: u8,
    pub identifier: u8,
    pub flags: u8,
}

impl LinkHeader {
    /// Broadcast from `node` with no identifier or flags
    pub fn broadcast(node: u8) -> Self {
        Self {
            destination: 0xFF,
            node,
            identifier: 0,
            flags: 0,
        }
    }
}

/// A frame handed up by the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioFrame {
    pub source_node: u8,
    pub destination_node: u8,
    pub identifier: u8,
    pub flags: u8,
    /// Received signal strength, dBm
    pub rssi: i16,
    pub payload: Vec<u8>,
}

/// Half-duplex packet radio
pub trait RadioDriver {
    fn send(&mut self, payload: &[u8], header: LinkHeader) -> io::Result<()>;

    /// Wait up to `timeout` for a frame; `Ok(None)` when nothing arrived
    fn receive(&mut self, timeout: Duration) -> io::Result<Option<RadioFrame>>;
}

impl<D: RadioDriver + ?Sized> RadioDriver for &mut D {
    fn send(&mut self, payload: &[u8], header: LinkHeader) -> io::Result<()> {
        (**self).send(payload, header)
    }

    fn receive(&mut self, timeout: Duration) -> io::Result<Option<RadioFrame>> {
        (**self).receive(timeout)
    }
}

/// In-process radio pair
///
/// What one end sends the other receives, stamped with the sender's header
/// and a fixed RSSI.
pub struct MemoryRadio {
    tx: Sender<RadioFrame>,
    rx: Receiver<RadioFrame>,
    rssi: i16,
}

impl MemoryRadio {
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (
            Self {
                tx: a_tx,
                rx: a_rx,
                rssi: -60,
            },
            Self {
                tx: b_tx,
                rx: b_rx,
                rssi: -60,
            },
        )
    }

    /// RSSI stamped on frames this end sends
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
        self
    }
}

impl RadioDriver for MemoryRadio {
    fn send(&mut self, payload: &[u8], header: LinkHeader) -> io::Result<()> {
        let frame = RadioFrame {
            source_node: header.node,
            destination_node: header.destination,
            identifier: header.identifier,
            flags: header.flags,
            rssi: self.rssi,
            payload: payload.to_vec(),
        };
        self.tx
            .send(frame)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "radio peer dropped"))
    }

    fn receive(&mut self, timeout: Duration) -> io::Result<Option<RadioFrame>> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "radio peer dropped",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_radio_stamps_header() {
        let (mut ground, sat) = MemoryRadio::pair();
        let mut sat = sat.with_rssi(-97);

        sat.send(b"beacon", LinkHeader::broadcast(0)).unwrap();
        let frame = ground
            .receive(Duration::from_millis(100))
            .unwrap()
            .unwrap();
        assert_eq!(frame.source_node, 0);
        assert_eq!(frame.destination_node, 0xFF);
        assert_eq!(frame.rssi, -97);
        assert_eq!(frame.payload, b"beacon");
    }

    #[test]
    fn test_receive_timeout_is_none() {
        let (mut ground, _sat) = MemoryRadio::pair();
        assert!(ground
            .receive(Duration::from_millis(10))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_dropped_peer() {
        let (mut ground, sat) = MemoryRadio::pair();
        drop(sat);
        assert!(ground.receive(Duration::from_millis(10)).is_err());
        assert!(ground.send(b"x", LinkHeader::broadcast(1)).is_err());
    }
}
