// Receiving side of the windowed file transfer

use super::{
    parse_chunk_count, FileTransfer, TransferError, TransferReport, TransferWindow, ABORT,
    MAX_CHUNKS, SEND_ACK,
};
use crate::serial::ByteChannel;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Destination for received chunks
pub trait ChunkSink {
    /// Write `bytes` at `offset` and make them durable before returning
    fn write_chunk(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()>;
}

impl ChunkSink for File {
    fn write_chunk(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(bytes)?;
        self.flush()?;
        // Interior data is on disk before the next chunk is acknowledged
        self.sync_data()
    }
}

impl ChunkSink for Vec<u8> {
    fn write_chunk(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?;
        let end = start + bytes.len();
        if self.len() < end {
            self.resize(end, 0);
        }
        self[start..end].copy_from_slice(bytes);
        Ok(())
    }
}

impl<'a, C: ByteChannel> FileTransfer<'a, C> {
    /// Receive a file into `path`, replacing any existing content
    pub fn receive_file(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<TransferReport, TransferError> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let report = self.receive_into(&mut file)?;
        info!("Received {} into {}", report.bytes, path.display());
        Ok(report)
    }

    /// Receive a file chunk by chunk into `sink`
    pub fn receive_into<S: ChunkSink>(
        &mut self,
        sink: &mut S,
    ) -> Result<TransferReport, TransferError> {
        info!("Waiting to receive chunk count...");
        let count = self
            .link
            .read_packet()?
            .ok_or(TransferError::MissingChunkCount)?;
        let total = parse_chunk_count(&count.payload)?;
        self.receive_chunks(total, sink)
    }

    /// Receive `total` chunks into `sink`, the chunk count having been read already
    pub fn receive_chunks<S: ChunkSink>(
        &mut self,
        total: u32,
        sink: &mut S,
    ) -> Result<TransferReport, TransferError> {
        if total as u64 > MAX_CHUNKS {
            return Err(TransferError::FileTooLarge {
                chunks: total as u64,
            });
        }
        info!("Expecting to receive {} chunks", total);

        let chunk_size = self.config.chunk_size as u64;
        let mut window = TransferWindow::new(total, self.config.group_size);
        let mut written = vec![false; total as usize];
        let mut report = TransferReport {
            total_chunks: total,
            ..TransferReport::default()
        };

        let max_bad = self.config.max_bad_packets;
        let mut consecutive_bad = 0;

        while consecutive_bad < max_bad {
            let packet = match self.link.read_packet()? {
                Some(packet) => packet,
                None => {
                    consecutive_bad += 1;
                    info!("Received a bad packet ({} in a row)", consecutive_bad);
                    continue;
                }
            };

            // Control messages first: they carry sequence 0 and must not tick off chunk 0
            if packet.payload == ABORT {
                warn!("Sender aborted the file transfer");
                return Err(TransferError::AbortedByPeer);
            }

            if packet.payload == SEND_ACK {
                consecutive_bad = 0;
                let missing = window.missing_list();
                debug!("Sending missing list {:?}", missing);
                self.link.write_packet(&serde_json::to_vec(&missing)?, 0)?;
                report.reconciliations += 1;

                if missing.is_empty() {
                    if window.received_last() {
                        info!("File transfer is complete");
                        return Ok(report);
                    }
                    window.advance();
                    info!(
                        "Group received, next group is chunks {}-{}",
                        window.group_start(),
                        window.group_end().saturating_sub(1)
                    );
                }
                continue;
            }

            let index = packet.sequence as u32;
            if index >= total {
                consecutive_bad += 1;
                warn!(
                    "Chunk {} is outside the {}-chunk transfer ({} bad in a row)",
                    index, total, consecutive_bad
                );
                continue;
            }
            consecutive_bad = 0;

            window.mark_received(index);
            sink.write_chunk(index as u64 * chunk_size, &packet.payload)?;

            let seen = &mut written[index as usize];
            if *seen {
                report.resent_chunks += 1;
            } else {
                *seen = true;
                report.bytes += packet.payload.len() as u64;
            }
            debug!(
                "Wrote chunk {} ({} still missing in group)",
                index,
                window.missing_list().len()
            );
        }

        warn!(
            "Aborting file transfer after {} consecutive bad packets",
            consecutive_bad
        );
        Err(TransferError::TooManyBadPackets(consecutive_bad))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_sink_out_of_order() {
        let mut sink: Vec<u8> = Vec::new();
        sink.write_chunk(4, b"5678").unwrap();
        sink.write_chunk(0, b"1234").unwrap();
        sink.write_chunk(8, b"9").unwrap();
        assert_eq!(sink, b"123456789");
    }

    #[test]
    fn test_file_sink_writes_at_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.bin");
        let mut file = File::create(&path).unwrap();

        file.write_chunk(3, b"def").unwrap();
        file.write_chunk(0, b"abc").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }
}
