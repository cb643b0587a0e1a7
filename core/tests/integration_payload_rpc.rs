//! Payload command RPC end to end: client and server on one in-memory link
//!
//! Run with: cargo test --test integration_payload_rpc

use serde_json::json;
use skylink_core::payload::{
    PayloadClient, PayloadError, PayloadReply, PayloadRequest, PayloadServer, DEFAULT_PACKET_SIZE,
};
use skylink_core::serial::{MemoryChannel, PacketLink};
use skylink_core::{LinkConfig, RetryPolicy, TransferConfig};
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::Duration;

fn link_config() -> LinkConfig {
    LinkConfig {
        sync_retry: RetryPolicy::new(3, Duration::from_millis(5)),
        ack_timeout: Duration::from_millis(50),
        byte_timeout: Duration::from_millis(50),
        sync_timeout: Duration::from_millis(1000),
        ..LinkConfig::default()
    }
}

fn transfer_config() -> TransferConfig {
    TransferConfig {
        chunk_size: 128,
        group_size: 8,
        settle_delay: Duration::ZERO,
        ..TransferConfig::default()
    }
}

/// Serve from `root` until the client hangs up
fn spawn_server(channel: MemoryChannel, root: &Path) -> JoinHandle<Result<(), PayloadError>> {
    let link = PacketLink::with_config(channel, link_config());
    let mut server = PayloadServer::new(link, root).with_transfer_config(transfer_config());
    thread::spawn(move || server.serve())
}

fn client(channel: MemoryChannel) -> PayloadClient<MemoryChannel> {
    PayloadClient::new(PacketLink::with_config(channel, link_config()))
        .with_transfer_config(transfer_config())
}

#[test]
fn test_simple_commands() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("images")).unwrap();
    std::fs::write(root.path().join("images/b.jpg"), b"b").unwrap();
    std::fs::write(root.path().join("images/a.jpg"), b"123456789").unwrap();

    let (a, b) = MemoryChannel::pair();
    let server = spawn_server(b, root.path());
    let mut client = client(a);

    assert_eq!(client.ping().unwrap(), "pong");
    assert_eq!(client.list_dir("images").unwrap(), vec!["a.jpg", "b.jpg"]);
    assert_eq!(client.crc_file("/images/a.jpg").unwrap(), 0xCBF4_3926);

    client.delete_file("images/b.jpg").unwrap();
    assert!(!root.path().join("images/b.jpg").exists());

    match client.delete_file("images/b.jpg") {
        Err(PayloadError::Remote(message)) => assert!(message.contains("IO error")),
        other => panic!("unexpected {:?}", other),
    }
    match client.list_dir("../") {
        Err(PayloadError::Remote(message)) => assert!(message.contains("escapes")),
        other => panic!("unexpected {:?}", other),
    }

    drop(client);
    // The server loop ends once its link is gone
    assert!(server.join().unwrap().is_err());
}

#[test]
fn test_push_then_fetch_round_trip() {
    let root = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let upload = local.path().join("upload.bin");
    let download = local.path().join("download.bin");

    let data: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 256) as u8).collect();
    std::fs::write(&upload, &data).unwrap();

    let (a, b) = MemoryChannel::pair();
    let server = spawn_server(b, root.path());
    let mut client = client(a);

    let pushed = client.push_file(&upload, "uploads.bin").unwrap();
    assert_eq!(pushed.total_chunks, 40);
    assert_eq!(std::fs::read(root.path().join("uploads.bin")).unwrap(), data);

    let fetched = client.fetch_file("uploads.bin", &download).unwrap();
    assert_eq!(fetched.bytes, data.len() as u64);
    assert_eq!(std::fs::read(&download).unwrap(), data);

    assert_eq!(
        client.crc_file("uploads.bin").unwrap(),
        crc32fast::hash(&data)
    );

    drop(client);
    let _ = server.join().unwrap();
}

#[test]
fn test_fetch_of_missing_file_reports_remote_error() {
    let root = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();

    let (a, b) = MemoryChannel::pair();
    let server = spawn_server(b, root.path());
    let mut client = client(a);

    let result = client.fetch_file("nope.bin", local.path().join("nope.bin"));
    assert!(matches!(result, Err(PayloadError::Remote(_))));
    assert!(!local.path().join("nope.bin").exists());

    // The link is still in step afterwards
    assert_eq!(client.ping().unwrap(), "pong");

    drop(client);
    let _ = server.join().unwrap();
}

#[test]
fn test_unknown_and_malformed_requests() {
    let root = tempfile::tempdir().unwrap();
    let (a, b) = MemoryChannel::pair();
    let server = spawn_server(b, root.path());
    let mut link = PacketLink::with_config(a, link_config());

    // Unknown commands are answered with a failure
    assert!(link
        .write_packet(br#"["take_photo", ["img1"], {}]"#, 0)
        .unwrap());
    let reply = PayloadReply::from_wire(&link.read_packet().unwrap().unwrap().payload).unwrap();
    assert!(!reply.ok);
    assert_eq!(reply.result, "Invalid command take_photo");

    // Unreadable requests get no reply at all
    assert!(link.write_packet(b"not json", 0).unwrap());
    assert!(link.read_packet().unwrap().is_none());

    drop(link);
    let _ = server.join().unwrap();
}

#[test]
fn test_file_by_radio_packets() {
    let root = tempfile::tempdir().unwrap();
    let data: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(root.path().join("image.bin"), &data).unwrap();

    let (a, b) = MemoryChannel::pair();
    let server = spawn_server(b, root.path());
    let mut client = client(a);

    let count = client.get_num_packets("image.bin", DEFAULT_PACKET_SIZE).unwrap();
    assert_eq!(count, 3);
    assert_eq!(client.get_num_packets("image.bin", 600).unwrap(), 1);

    // packet_size may be left off the wire request
    let request = PayloadRequest::from_parts("get_num_packets", &[json!("image.bin")]).unwrap();
    assert_eq!(client.call(&request).unwrap(), json!(3));

    let mut rebuilt = Vec::new();
    for packet_num in 0..count {
        rebuilt.extend(
            client
                .file_packet("image.bin", packet_num, DEFAULT_PACKET_SIZE)
                .unwrap(),
        );
    }
    assert_eq!(rebuilt, data);
    assert_eq!(client.file_packet("image.bin", 2, DEFAULT_PACKET_SIZE).unwrap().len(), 100);
    assert!(client.file_packet("image.bin", 3, DEFAULT_PACKET_SIZE).unwrap().is_empty());

    assert!(matches!(
        client.file_packet("missing.bin", 0, DEFAULT_PACKET_SIZE),
        Err(PayloadError::Remote(_))
    ));
    assert!(matches!(
        client.get_num_packets("missing.bin", DEFAULT_PACKET_SIZE),
        Err(PayloadError::Remote(_))
    ));

    drop(client);
    let _ = server.join().unwrap();
}

#[test]
fn test_info_reports_boot_count() {
    let root = tempfile::tempdir().unwrap();
    let (a, b) = MemoryChannel::pair();
    let link = PacketLink::with_config(b, link_config());
    let mut server = PayloadServer::new(link, root.path()).with_boot_count(475);
    let server = thread::spawn(move || server.serve());
    let mut client = client(a);

    let info = client.info().unwrap();
    assert_eq!(info.id, "475");
    assert!(!info.temp.is_empty());
    assert!(!info.storage.is_empty());

    drop(client);
    let _ = server.join().unwrap();
}

#[test]
fn test_info_without_boot_count() {
    let root = tempfile::tempdir().unwrap();
    let (a, b) = MemoryChannel::pair();
    let server = spawn_server(b, root.path());
    let mut client = client(a);

    assert_eq!(client.info().unwrap().id, "999999");

    drop(client);
    let _ = server.join().unwrap();
}
