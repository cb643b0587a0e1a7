// Caller side of the payload command RPC

use super::{PayloadError, PayloadInfo, PayloadReply, PayloadRequest};
use crate::config::TransferConfig;
use crate::serial::{ByteChannel, PacketLink};
use crate::transfer::{parse_chunk_count, FileTransfer, TransferReport};
use base64::Engine;
use serde_json::Value;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::{debug, info};

/// Sends commands to the payload computer
pub struct PayloadClient<C: ByteChannel> {
    link: PacketLink<C>,
    transfer: TransferConfig,
}

impl<C: ByteChannel> PayloadClient<C> {
    pub fn new(link: PacketLink<C>) -> Self {
        Self {
            link,
            transfer: TransferConfig::default(),
        }
    }

    pub fn with_transfer_config(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn link(&self) -> &PacketLink<C> {
        &self.link
    }

    pub fn into_link(self) -> PacketLink<C> {
        self.link
    }

    /// Run a command that needs no file transfer and return its result
    pub fn call(&mut self, request: &PayloadRequest) -> Result<Value, PayloadError> {
        self.send_request(request)?;
        self.read_reply()?.into_result()
    }

    pub fn ping(&mut self) -> Result<String, PayloadError> {
        match self.call(&PayloadRequest::Ping)? {
            Value::String(pong) => Ok(pong),
            other => Err(PayloadError::UnexpectedReply(other.to_string())),
        }
    }

    pub fn list_dir(&mut self, path: &str) -> Result<Vec<String>, PayloadError> {
        let result = self.call(&PayloadRequest::ListDir {
            path: path.to_string(),
        })?;
        serde_json::from_value(result.clone())
            .map_err(|_| PayloadError::UnexpectedReply(result.to_string()))
    }

    pub fn delete_file(&mut self, path: &str) -> Result<(), PayloadError> {
        self.call(&PayloadRequest::DeleteFile {
            path: path.to_string(),
        })?;
        Ok(())
    }

    pub fn crc_file(&mut self, path: &str) -> Result<u32, PayloadError> {
        let result = self.call(&PayloadRequest::CrcFile {
            path: path.to_string(),
        })?;
        result
            .as_u64()
            .and_then(|crc| u32::try_from(crc).ok())
            .ok_or_else(|| PayloadError::UnexpectedReply(result.to_string()))
    }

    pub fn info(&mut self) -> Result<PayloadInfo, PayloadError> {
        let result = self.call(&PayloadRequest::Info)?;
        serde_json::from_value(result.clone())
            .map_err(|_| PayloadError::UnexpectedReply(result.to_string()))
    }

    /// Number of `packet_size` packets `path` splits into
    pub fn get_num_packets(&mut self, path: &str, packet_size: u32) -> Result<u32, PayloadError> {
        let result = self.call(&PayloadRequest::GetNumPackets {
            path: path.to_string(),
            packet_size,
        })?;
        result
            .as_u64()
            .and_then(|count| u32::try_from(count).ok())
            .ok_or_else(|| PayloadError::UnexpectedReply(result.to_string()))
    }

    /// One packet of `path`, decoded from the base64 reply
    pub fn file_packet(
        &mut self,
        path: &str,
        packet_num: u32,
        packet_size: u32,
    ) -> Result<Vec<u8>, PayloadError> {
        let result = self.call(&PayloadRequest::SendFilePacket {
            path: path.to_string(),
            packet_num,
            packet_size,
        })?;
        result
            .as_str()
            .and_then(|encoded| {
                base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim_end())
                    .ok()
            })
            .ok_or_else(|| PayloadError::UnexpectedReply(result.to_string()))
    }

    /// Download `remote` from the payload into `local`
    pub fn fetch_file(
        &mut self,
        remote: &str,
        local: impl AsRef<Path>,
    ) -> Result<TransferReport, PayloadError> {
        self.send_request(&PayloadRequest::SendFile {
            path: remote.to_string(),
        })?;

        // Either the chunk count opening the transfer, or a reply refusing it
        let first = self.link.read_packet()?.ok_or(PayloadError::NoReply)?;
        if first.payload.len() != 4 {
            PayloadReply::from_wire(&first.payload)?.into_result()?;
            return Err(PayloadError::UnexpectedReply(
                "payload replied without starting the transfer".to_string(),
            ));
        }
        let total = parse_chunk_count(&first.payload)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(local.as_ref())?;
        let report = FileTransfer::with_config(&mut self.link, self.transfer)
            .receive_chunks(total, &mut file)?;
        self.read_reply()?.into_result()?;

        info!("Fetched {} ({} bytes)", remote, report.bytes);
        Ok(report)
    }

    /// Upload `local` to the payload as `remote`
    pub fn push_file(
        &mut self,
        local: impl AsRef<Path>,
        remote: &str,
    ) -> Result<TransferReport, PayloadError> {
        self.send_request(&PayloadRequest::ReceiveFile {
            path: remote.to_string(),
        })?;

        let report = FileTransfer::with_config(&mut self.link, self.transfer).send_file(local)?;
        self.read_reply()?.into_result()?;

        info!("Pushed {} ({} bytes)", remote, report.bytes);
        Ok(report)
    }

    fn send_request(&mut self, request: &PayloadRequest) -> Result<(), PayloadError> {
        debug!("Sending command {}", request.name());
        if !self.link.write_packet(&request.to_wire()?, 0)? {
            return Err(PayloadError::NotAcknowledged);
        }
        Ok(())
    }

    fn read_reply(&mut self) -> Result<PayloadReply, PayloadError> {
        let packet = self.link.read_packet()?.ok_or(PayloadError::NoReply)?;
        PayloadReply::from_wire(&packet.payload)
    }
}
