//! Payload computer command RPC over the serial link
//!
//! The flight (or ground) side sends one JSON request per frame and reads one
//! JSON reply. File commands hand the link to the windowed file transfer
//! between the request and the reply. Every path the payload touches is
//! resolved inside a fixed root directory.

pub mod client;
pub mod request;
pub mod server;

pub use client::PayloadClient;
pub use request::{PayloadInfo, PayloadReply, PayloadRequest, DEFAULT_PACKET_SIZE};
pub use server::PayloadServer;

use crate::serial::SerialError;
use crate::transfer::TransferError;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Payload RPC errors
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Link error: {0}")]
    Link(#[from] SerialError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid command {0}")]
    UnknownCommand(String),

    #[error("Bad arguments for {command}: {reason}")]
    BadArguments { command: String, reason: String },

    #[error("Path escapes the payload root: {0}")]
    PathEscapesRoot(String),

    #[error("Request was not acknowledged")]
    NotAcknowledged,

    #[error("No reply from payload")]
    NoReply,

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("Payload error: {0}")]
    Remote(String),
}

/// Resolve `requested` under `root`
///
/// Leading `/` is ignored so absolute-looking paths stay inside the root;
/// `..` and drive prefixes are refused.
pub fn resolve_in_root(root: &Path, requested: &str) -> Result<PathBuf, PayloadError> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(requested).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(PayloadError::PathEscapesRoot(requested.to_string()))
            }
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_in_root() {
        let root = Path::new("/srv/payload");
        assert_eq!(
            resolve_in_root(root, "images/a.jpg").unwrap(),
            PathBuf::from("/srv/payload/images/a.jpg")
        );
        assert_eq!(
            resolve_in_root(root, "/logs/./0.log").unwrap(),
            PathBuf::from("/srv/payload/logs/0.log")
        );
        assert_eq!(resolve_in_root(root, "").unwrap(), PathBuf::from("/srv/payload"));
        assert!(matches!(
            resolve_in_root(root, "../etc/passwd"),
            Err(PayloadError::PathEscapesRoot(_))
        ));
    }
}
