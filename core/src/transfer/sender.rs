// Sending side of the windowed file transfer

use super::{
    chunk_count, FileTransfer, TransferError, TransferReport, ABORT, MAX_CHUNKS, SEND_ACK,
};
use crate::serial::ByteChannel;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;
use tracing::{debug, info, warn};

impl<'a, C: ByteChannel> FileTransfer<'a, C> {
    /// Send the file at `path`
    pub fn send_file(&mut self, path: impl AsRef<Path>) -> Result<TransferReport, TransferError> {
        let path = path.as_ref();
        info!("Sending file {}", path.display());

        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        self.send_from(&mut file, len)
    }

    /// Send `len` bytes from `source`
    ///
    /// Succeeds only when the reconciliation round after the final group
    /// reports nothing missing.
    pub fn send_from<R: Read + Seek>(
        &mut self,
        source: &mut R,
        len: u64,
    ) -> Result<TransferReport, TransferError> {
        let chunks = chunk_count(len, self.config.chunk_size);
        if chunks > MAX_CHUNKS {
            return Err(TransferError::FileTooLarge { chunks });
        }
        let total = chunks as u32;

        let mut report = TransferReport {
            total_chunks: total,
            bytes: len,
            ..TransferReport::default()
        };

        // Sequence number is unused for control messages
        if !self.link.write_packet(&total.to_be_bytes(), 0)? {
            warn!("Receiver did not acknowledge the chunk count");
            return Err(TransferError::CountNotAcknowledged);
        }
        info!("About to send {} chunks ({} bytes)", total, len);

        if !self.config.settle_delay.is_zero() {
            std::thread::sleep(self.config.settle_delay);
        }

        let group_size = self.config.group_size.max(1);
        for index in 0..total {
            let chunk = self.read_chunk(source, len, index)?;
            debug!("Sending chunk {} ({} bytes)", index, chunk.len());

            if !self.link.write_packet(&chunk, index as u16)? {
                debug!("Chunk {} was not acknowledged", index);
            }

            let end_of_group = (index + 1) % group_size == 0 || index + 1 == total;
            if end_of_group {
                let group = index - index % group_size..index + 1;
                self.reconcile(source, len, group, &mut report)?;
            }
        }

        if total == 0 {
            self.reconcile(source, len, 0..0, &mut report)?;
        }

        info!(
            "File transfer completed: {} chunks, {} resent",
            total, report.resent_chunks
        );
        Ok(report)
    }

    /// Resend whatever the receiver reports missing until the group is whole
    ///
    /// Allows `max_resend_cycles` resend rounds; a group still incomplete after
    /// the last round aborts the transfer.
    ///
    /// Indices outside `group` are dropped from the reply. When the receiver's
    /// "nothing missing" answer is lost it has already moved to the next group,
    /// and the retried request returns that group's list instead; with nothing
    /// left inside `group` this one counts as complete.
    fn reconcile<R: Read + Seek>(
        &mut self,
        source: &mut R,
        len: u64,
        group: Range<u32>,
        report: &mut TransferReport,
    ) -> Result<(), TransferError> {
        let cycles = self.config.max_resend_cycles;

        for round in 0..=cycles {
            let reply = match self.request_missing()? {
                Some(missing) => missing,
                None => {
                    warn!("Receiver is not responsive - aborting file transfer");
                    self.send_abort()?;
                    return Err(TransferError::ReceiverUnresponsive {
                        attempts: self.config.ack_retry.max_attempts,
                    });
                }
            };
            report.reconciliations += 1;

            let (missing, ahead): (Vec<u32>, Vec<u32>) =
                reply.into_iter().partition(|index| group.contains(index));
            if !ahead.is_empty() {
                debug!(
                    "Ignoring {} indices outside chunks {}-{}",
                    ahead.len(),
                    group.start,
                    group.end.saturating_sub(1)
                );
            }

            if missing.is_empty() {
                debug!("Receiver has this group");
                return Ok(());
            }

            if round == cycles {
                warn!(
                    "Chunks still missing after {} resend cycles: {:?} - aborting file transfer",
                    cycles, missing
                );
                self.send_abort()?;
                return Err(TransferError::ResendCyclesExhausted { cycles, missing });
            }

            info!("Receiver is missing chunks {:?}", missing);
            for index in missing {
                let chunk = self.read_chunk(source, len, index)?;
                debug!("Re-sending chunk {}", index);
                self.link.write_packet(&chunk, index as u16)?;
                report.resent_chunks += 1;
            }
        }

        // The final round above always returns
        Ok(())
    }

    /// Ask for the missing list; `None` once every attempt went unanswered
    fn request_missing(&mut self) -> Result<Option<Vec<u32>>, TransferError> {
        let retry = self.config.ack_retry;

        for attempt in 1..=retry.max_attempts {
            debug!("Requesting missing chunks (attempt {})", attempt);
            if !self.link.write_packet(SEND_ACK, 0)? {
                debug!("Missing-list request was not acknowledged");
            }

            match self.link.read_packet()? {
                Some(reply) => match serde_json::from_slice::<Vec<u32>>(&reply.payload) {
                    Ok(missing) => return Ok(Some(missing)),
                    Err(e) => warn!(
                        "Unreadable missing list ({} bytes): {}",
                        reply.payload.len(),
                        e
                    ),
                },
                None => info!("Receiver did not respond, trying again..."),
            }
            retry.pause();
        }

        Ok(None)
    }

    fn send_abort(&mut self) -> Result<(), TransferError> {
        if !self.link.write_packet(ABORT, 0)? {
            debug!("Abort was not acknowledged");
        }
        Ok(())
    }

    /// Read chunk `index` at its real length (the final chunk may be short)
    fn read_chunk<R: Read + Seek>(
        &self,
        source: &mut R,
        len: u64,
        index: u32,
    ) -> Result<Vec<u8>, TransferError> {
        let chunk_size = self.config.chunk_size as u64;
        let offset = index as u64 * chunk_size;
        let size = chunk_size.min(len.saturating_sub(offset)) as usize;

        let mut chunk = vec![0u8; size];
        source.seek(SeekFrom::Start(offset))?;
        source.read_exact(&mut chunk)?;
        Ok(chunk)
    }
}
