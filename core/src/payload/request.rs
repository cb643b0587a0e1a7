// Payload command wire format
//
// request: ["name", [args...], {}]
// reply:   [ok, result]

use super::PayloadError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Packet size assumed by the per-packet file commands (one radio frame)
pub const DEFAULT_PACKET_SIZE: u32 = 250;

/// A command for the payload computer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadRequest {
    Ping,
    ListDir { path: String },
    DeleteFile { path: String },
    /// Payload sends `path` to the caller over the file transfer
    SendFile { path: String },
    /// Payload receives a file from the caller into `path`
    ReceiveFile { path: String },
    /// CRC32 of a file, for checking a transfer end to end
    CrcFile { path: String },
    /// Number of `packet_size` packets in a file, counting a short last one
    GetNumPackets { path: String, packet_size: u32 },
    /// One packet of a file, base64 encoded in the reply
    SendFilePacket {
        path: String,
        packet_num: u32,
        packet_size: u32,
    },
    /// Temperature, boot count and free memory
    Info,
}

impl PayloadRequest {
    pub fn name(&self) -> &'static str {
        match self {
            PayloadRequest::Ping => "ping",
            PayloadRequest::ListDir { .. } => "list_dir",
            PayloadRequest::DeleteFile { .. } => "delete_file",
            PayloadRequest::SendFile { .. } => "send_file",
            PayloadRequest::ReceiveFile { .. } => "receive_file",
            PayloadRequest::CrcFile { .. } => "crc_file",
            PayloadRequest::GetNumPackets { .. } => "get_num_packets",
            PayloadRequest::SendFilePacket { .. } => "send_file_packet",
            PayloadRequest::Info => "info",
        }
    }

    fn args(&self) -> Vec<Value> {
        match self {
            PayloadRequest::Ping | PayloadRequest::Info => Vec::new(),
            PayloadRequest::ListDir { path }
            | PayloadRequest::DeleteFile { path }
            | PayloadRequest::SendFile { path }
            | PayloadRequest::ReceiveFile { path }
            | PayloadRequest::CrcFile { path } => vec![Value::String(path.clone())],
            PayloadRequest::GetNumPackets { path, packet_size } => {
                vec![Value::String(path.clone()), Value::from(*packet_size)]
            }
            PayloadRequest::SendFilePacket {
                path,
                packet_num,
                packet_size,
            } => vec![
                Value::String(path.clone()),
                Value::from(*packet_num),
                Value::from(*packet_size),
            ],
        }
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, PayloadError> {
        Ok(serde_json::to_vec(&(self.name(), self.args(), Map::new()))?)
    }

    /// Split a wire request into name and arguments
    ///
    /// Fails only when the bytes are not a `[name, args, kwargs]` triple.
    pub fn parse_wire(bytes: &[u8]) -> Result<(String, Vec<Value>), PayloadError> {
        let (name, args, _kwargs): (String, Vec<Value>, Map<String, Value>) =
            serde_json::from_slice(bytes)?;
        Ok((name, args))
    }

    /// Resolve a command name and its positional arguments
    ///
    /// A missing trailing `packet_size` takes `DEFAULT_PACKET_SIZE`.
    pub fn from_parts(name: &str, args: &[Value]) -> Result<Self, PayloadError> {
        let bad = |reason: String| PayloadError::BadArguments {
            command: name.to_string(),
            reason,
        };
        let path = || -> Result<String, PayloadError> {
            match args {
                [Value::String(path), ..] => Ok(path.clone()),
                _ => Err(bad("expected a path string".to_string())),
            }
        };
        let number = |position: usize, default: Option<u32>| -> Result<u32, PayloadError> {
            match (args.get(position), default) {
                (Some(value), _) => value
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| bad(format!("argument {} must be a u32", position + 1))),
                (None, Some(default)) => Ok(default),
                (None, None) => Err(bad(format!("missing argument {}", position + 1))),
            }
        };
        let packet_size = |position: usize| -> Result<u32, PayloadError> {
            match number(position, Some(DEFAULT_PACKET_SIZE))? {
                0 => Err(bad("packet_size must be positive".to_string())),
                size => Ok(size),
            }
        };

        Ok(match name {
            "ping" => PayloadRequest::Ping,
            "list_dir" => PayloadRequest::ListDir { path: path()? },
            "delete_file" => PayloadRequest::DeleteFile { path: path()? },
            "send_file" => PayloadRequest::SendFile { path: path()? },
            "receive_file" => PayloadRequest::ReceiveFile { path: path()? },
            "crc_file" => PayloadRequest::CrcFile { path: path()? },
            "get_num_packets" => PayloadRequest::GetNumPackets {
                path: path()?,
                packet_size: packet_size(1)?,
            },
            "send_file_packet" => PayloadRequest::SendFilePacket {
                path: path()?,
                packet_num: number(1, None)?,
                packet_size: packet_size(2)?,
            },
            "info" => PayloadRequest::Info,
            other => return Err(PayloadError::UnknownCommand(other.to_string())),
        })
    }

    pub fn from_wire(bytes: &[u8]) -> Result<Self, PayloadError> {
        let (name, args) = Self::parse_wire(bytes)?;
        Self::from_parts(&name, &args)
    }
}

/// Reply to `info`, every field as text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadInfo {
    /// SoC temperature in degrees Celsius
    pub temp: String,
    /// Boot count
    pub id: String,
    /// Available memory
    pub storage: String,
}

/// Outcome of one payload command
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadReply {
    pub ok: bool,
    pub result: Value,
}

impl PayloadReply {
    pub fn success(result: Value) -> Self {
        Self { ok: true, result }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: Value::String(message.into()),
        }
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, PayloadError> {
        Ok(serde_json::to_vec(&(self.ok, &self.result))?)
    }

    pub fn from_wire(bytes: &[u8]) -> Result<Self, PayloadError> {
        let (ok, result): (bool, Value) = serde_json::from_slice(bytes)?;
        Ok(Self { ok, result })
    }

    /// The result, or the remote error message as `PayloadError::Remote`
    pub fn into_result(self) -> Result<Value, PayloadError> {
        if self.ok {
            Ok(self.result)
        } else {
            let message = match self.result {
                Value::String(message) => message,
                other => other.to_string(),
            };
            Err(PayloadError::Remote(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let wire = PayloadRequest::ListDir {
            path: "images".into(),
        }
        .to_wire()
        .unwrap();
        assert_eq!(wire, br#"["list_dir",["images"],{}]"#);

        assert_eq!(PayloadRequest::Ping.to_wire().unwrap(), br#"["ping",[],{}]"#);
    }

    #[test]
    fn test_request_parsing() {
        assert_eq!(
            PayloadRequest::from_wire(br#"["send_file", ["logs/0.log"], {}]"#).unwrap(),
            PayloadRequest::SendFile {
                path: "logs/0.log".into()
            }
        );
        assert!(matches!(
            PayloadRequest::from_wire(br#"["take_photo", ["a"], {}]"#),
            Err(PayloadError::UnknownCommand(name)) if name == "take_photo"
        ));
        assert!(matches!(
            PayloadRequest::from_wire(br#"["list_dir", [], {}]"#),
            Err(PayloadError::BadArguments { .. })
        ));
        assert!(matches!(
            PayloadRequest::from_wire(b"not json"),
            Err(PayloadError::Json(_))
        ));
    }

    #[test]
    fn test_packet_requests() {
        assert_eq!(
            PayloadRequest::from_wire(br#"["get_num_packets", ["img.jpg"], {}]"#).unwrap(),
            PayloadRequest::GetNumPackets {
                path: "img.jpg".into(),
                packet_size: DEFAULT_PACKET_SIZE,
            }
        );
        assert_eq!(
            PayloadRequest::from_wire(br#"["send_file_packet", ["img.jpg", 3, 100], {}]"#).unwrap(),
            PayloadRequest::SendFilePacket {
                path: "img.jpg".into(),
                packet_num: 3,
                packet_size: 100,
            }
        );
        assert!(matches!(
            PayloadRequest::from_wire(br#"["send_file_packet", ["img.jpg"], {}]"#),
            Err(PayloadError::BadArguments { .. })
        ));
        assert!(matches!(
            PayloadRequest::from_wire(br#"["send_file_packet", ["img.jpg", -1], {}]"#),
            Err(PayloadError::BadArguments { .. })
        ));
        assert!(matches!(
            PayloadRequest::from_wire(br#"["get_num_packets", ["img.jpg", 0], {}]"#),
            Err(PayloadError::BadArguments { .. })
        ));

        let wire = PayloadRequest::SendFilePacket {
            path: "img.jpg".into(),
            packet_num: 2,
            packet_size: 250,
        }
        .to_wire()
        .unwrap();
        assert_eq!(wire, br#"["send_file_packet",["img.jpg",2,250],{}]"#);
        assert_eq!(PayloadRequest::Info.to_wire().unwrap(), br#"["info",[],{}]"#);
    }

    #[test]
    fn test_reply_wire_format() {
        let reply = PayloadReply::success(json!("pong"));
        assert_eq!(reply.to_wire().unwrap(), br#"[true,"pong"]"#);

        let reply = PayloadReply::from_wire(br#"[false, "FileNotFound: x"]"#).unwrap();
        assert!(matches!(
            reply.into_result(),
            Err(PayloadError::Remote(message)) if message == "FileNotFound: x"
        ));
    }
}
