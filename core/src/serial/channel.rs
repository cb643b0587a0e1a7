// Byte channels: the raw duplex streams a PacketLink runs on

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// A duplex byte stream with bounded reads
///
/// Every read names its own upper bound on waiting, so no protocol stage can
/// stall forever on a silent peer.
pub trait ByteChannel {
    /// Read up to `buf.len()` bytes, waiting at most `timeout` for data.
    ///
    /// Returns `Ok(0)` when nothing arrived in time. A peer that has gone away
    /// for good is reported as an `UnexpectedEof` error.
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Write every byte, blocking until the channel has accepted them
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl<C: ByteChannel + ?Sized> ByteChannel for &mut C {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        (**self).read_timeout(buf, timeout)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_all(bytes)
    }
}

impl<C: ByteChannel + ?Sized> ByteChannel for Box<C> {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        (**self).read_timeout(buf, timeout)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_all(bytes)
    }
}

/// Streams whose blocking reads can be bounded
pub trait ReadTimeout {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl ReadTimeout for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

/// Adapter from a blocking `Read + Write` stream to a `ByteChannel`
///
/// Used with a serial port bridged to TCP (ser2net, socat) or any other
/// stream that supports read timeouts.
pub struct StreamChannel<S> {
    stream: S,
}

impl<S> StreamChannel<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Read + Write + ReadTimeout> ByteChannel for StreamChannel<S> {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        // A zero timeout means "block forever" to the OS
        let bound = timeout.max(Duration::from_millis(1));
        self.stream.set_read_timeout(Some(bound))?;

        match self.stream.read(buf) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream closed by peer",
            )),
            Ok(n) => Ok(n),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        Write::write_all(&mut self.stream, bytes)?;
        self.stream.flush()
    }
}

/// In-process duplex channel
///
/// `MemoryChannel::pair()` returns two connected ends; bytes written on one
/// end are read on the other. Useful for tests and loopback benches.
pub struct MemoryChannel {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

impl MemoryChannel {
    pub fn pair() -> (MemoryChannel, MemoryChannel) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();

        (
            MemoryChannel {
                tx: a_tx,
                rx: a_rx,
                pending: VecDeque::new(),
            },
            MemoryChannel {
                tx: b_tx,
                rx: b_rx,
                pending: VecDeque::new(),
            },
        )
    }

    /// Bytes received but not yet read
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    fn drain_ready(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(chunk) => self.pending.extend(chunk),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }
}

impl ByteChannel for MemoryChannel {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.pending.is_empty() {
            match self.rx.recv_timeout(timeout) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "memory channel peer dropped",
                    ))
                }
            }
        }
        self.drain_ready();

        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.tx
            .send(bytes.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "memory channel peer dropped"))
    }
}
