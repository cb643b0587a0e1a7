// Payload-side command loop

use super::{resolve_in_root, PayloadError, PayloadInfo, PayloadReply, PayloadRequest};
use crate::config::TransferConfig;
use crate::serial::{ByteChannel, PacketLink};
use crate::transfer::{chunk_count, FileTransfer};
use base64::Engine;
use serde_json::{json, Value};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Reported as the boot count when the payload was not told one
pub const UNKNOWN_BOOT_COUNT: u32 = 999_999;

const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";
const MEMINFO: &str = "/proc/meminfo";

/// Runs payload commands received over a packet link
pub struct PayloadServer<C: ByteChannel> {
    link: PacketLink<C>,
    root: PathBuf,
    transfer: TransferConfig,
    boot_count: Option<u32>,
}

impl<C: ByteChannel> PayloadServer<C> {
    pub fn new(link: PacketLink<C>, root: impl Into<PathBuf>) -> Self {
        Self {
            link,
            root: root.into(),
            transfer: TransferConfig::default(),
            boot_count: None,
        }
    }

    pub fn with_transfer_config(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }

    /// Boot count reported by `info`
    pub fn with_boot_count(mut self, boot_count: u32) -> Self {
        self.boot_count = Some(boot_count);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn link(&self) -> &PacketLink<C> {
        &self.link
    }

    /// Serve until the link fails
    pub fn serve(&mut self) -> Result<(), PayloadError> {
        info!("Payload server running, root {}", self.root.display());
        loop {
            self.serve_once()?;
        }
    }

    /// Receive one command, run it and send the reply
    ///
    /// Returns `Ok(None)` when nothing arrived or the request was unreadable;
    /// such requests get no reply.
    pub fn serve_once(&mut self) -> Result<Option<PayloadReply>, PayloadError> {
        debug!("Waiting for command...");
        let packet = match self.link.read_packet()? {
            Some(packet) => packet,
            None => return Ok(None),
        };

        let (name, args) = match PayloadRequest::parse_wire(&packet.payload) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(
                    "Error decoding command packet ({} bytes): {}",
                    packet.payload.len(),
                    e
                );
                return Ok(None);
            }
        };

        debug!("Dispatching {} with args {:?}", name, args);
        let reply = match PayloadRequest::from_parts(&name, &args)
            .and_then(|request| self.execute(&request))
        {
            Ok(result) => {
                debug!("Command {} succeeded: {}", name, result);
                PayloadReply::success(result)
            }
            Err(e) => {
                warn!("Command {} failed: {}", name, e);
                PayloadReply::failure(e.to_string())
            }
        };

        if !self.link.write_packet(&reply.to_wire()?, 0)? {
            warn!("Reply to {} was not acknowledged", name);
        }
        Ok(Some(reply))
    }

    fn execute(&mut self, request: &PayloadRequest) -> Result<Value, PayloadError> {
        match request {
            PayloadRequest::Ping => Ok(json!("pong")),
            PayloadRequest::ListDir { path } => {
                let dir = resolve_in_root(&self.root, path)?;
                let mut names = Vec::new();
                for entry in fs::read_dir(&dir)? {
                    names.push(entry?.file_name().to_string_lossy().into_owned());
                }
                names.sort();
                Ok(json!(names))
            }
            PayloadRequest::DeleteFile { path } => {
                fs::remove_file(resolve_in_root(&self.root, path)?)?;
                Ok(Value::Null)
            }
            PayloadRequest::SendFile { path } => {
                let file = resolve_in_root(&self.root, path)?;
                let report =
                    FileTransfer::with_config(&mut self.link, self.transfer).send_file(&file)?;
                info!("Sent {} ({} chunks)", file.display(), report.total_chunks);
                Ok(json!(true))
            }
            PayloadRequest::ReceiveFile { path } => {
                let file = resolve_in_root(&self.root, path)?;
                let report =
                    FileTransfer::with_config(&mut self.link, self.transfer).receive_file(&file)?;
                info!("Received {} ({} bytes)", file.display(), report.bytes);
                Ok(json!(true))
            }
            PayloadRequest::CrcFile { path } => {
                let crc = crc_file(&resolve_in_root(&self.root, path)?)?;
                Ok(json!(crc))
            }
            PayloadRequest::GetNumPackets { path, packet_size } => {
                let len = fs::metadata(resolve_in_root(&self.root, path)?)?.len();
                Ok(json!(chunk_count(len, *packet_size as usize)))
            }
            PayloadRequest::SendFilePacket {
                path,
                packet_num,
                packet_size,
            } => {
                let file = resolve_in_root(&self.root, path)?;
                let packet = read_packet_at(&file, *packet_num, *packet_size)?;
                debug!("Packet {} of {} is {} bytes", packet_num, file.display(), packet.len());
                Ok(json!(base64::engine::general_purpose::STANDARD.encode(packet)))
            }
            PayloadRequest::Info => {
                let info = PayloadInfo {
                    temp: read_temperature().unwrap_or_else(|| "unknown".to_string()),
                    id: self.boot_count.unwrap_or(UNKNOWN_BOOT_COUNT).to_string(),
                    storage: read_available_memory().unwrap_or_else(|| "unknown".to_string()),
                };
                Ok(serde_json::to_value(info)?)
            }
        }
    }
}

/// Bytes of packet `packet_num`; short at the end of the file, empty past it
fn read_packet_at(path: &Path, packet_num: u32, packet_size: u32) -> Result<Vec<u8>, PayloadError> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(packet_num as u64 * packet_size as u64))?;

    let mut packet = Vec::with_capacity(packet_size as usize);
    file.take(packet_size as u64).read_to_end(&mut packet)?;
    Ok(packet)
}

/// SoC temperature in degrees Celsius, from the kernel's millidegree reading
fn read_temperature() -> Option<String> {
    let raw = fs::read_to_string(THERMAL_ZONE).ok()?;
    let millis: i64 = raw.trim().parse().ok()?;
    Some(format!("{:.1}", millis as f64 / 1000.0))
}

fn read_available_memory() -> Option<String> {
    let meminfo = fs::read_to_string(MEMINFO).ok()?;
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemAvailable:"))
        .map(|value| value.trim().to_string())
}

fn crc_file(path: &Path) -> Result<u32, PayloadError> {
    let mut file = File::open(path)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}
