//! End-to-end transfers: two clients meet at a real relay over WebSocket and
//! move a file across an in-process loopback channel.

use drop_client::{
    receive_file, send_file, ClientConfig, Integrity, LoopbackHub, NegotiationConfig,
    TransferConfig, TransferMode, WsSignalTransport,
};
use drop_relay::config::Config;
use drop_relay::protocol::RelayServer;
use drop_relay::server::SignalRelay;
use drop_types::SessionKey;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn start_relay() -> String {
    let mut config = Config::default();
    config.server.bind_address = "127.0.0.1:0".into();
    let server = RelayServer::bind(Arc::new(SignalRelay::new(config)))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    format!("ws://{addr}")
}

fn config(mode: TransferMode) -> ClientConfig {
    ClientConfig::default()
        .with_negotiation(NegotiationConfig::default().with_grace(Duration::from_millis(50)))
        .with_transfer(
            TransferConfig::default()
                .with_mode(mode)
                .with_chunk_size(64 * 1024),
        )
}

fn write_source(dir: &Path, name: &str, len: usize) -> Vec<u8> {
    let data: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
    std::fs::write(dir.join(name), &data).unwrap();
    data
}

async fn transfer(
    url: &str,
    key: &str,
    config: &ClientConfig,
    source: &Path,
    output: &Path,
) -> (drop_client::TransferOutcome, drop_client::TransferOutcome) {
    let hub = LoopbackHub::new();
    let key = SessionKey::new(key);
    let sender_signal = WsSignalTransport::connect(url).await.unwrap();
    let receiver_signal = WsSignalTransport::connect(url).await.unwrap();

    let run = async {
        tokio::join!(
            send_file(&sender_signal, hub.engine(), config, &key, source),
            receive_file(&receiver_signal, hub.engine(), config, &key, output)
        )
    };
    let (sent, received) = tokio::time::timeout(Duration::from_secs(20), run)
        .await
        .expect("transfer timed out");
    (sent.unwrap(), received.unwrap())
}

#[tokio::test]
async fn pull_transfer_through_relay() {
    let url = start_relay().await;
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let data = write_source(src.path(), "report.pdf", 300_000);

    let (sent, received) = transfer(
        &url,
        "pull-1",
        &config(TransferMode::Pull),
        &src.path().join("report.pdf"),
        out.path(),
    )
    .await;

    assert_eq!(sent.bytes, 300_000);
    assert_eq!(received.bytes, 300_000);
    assert_eq!(received.integrity, Integrity::Verified);
    assert_eq!(received.path, out.path().join("report.pdf"));
    assert_eq!(received.digest, sent.digest);
    assert_eq!(std::fs::read(&received.path).unwrap(), data);
}

#[tokio::test]
async fn push_transfer_through_relay() {
    let url = start_relay().await;
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let data = write_source(src.path(), "movie.mkv", 1_000_000);

    let (sent, received) = transfer(
        &url,
        "push-1",
        &config(TransferMode::Push),
        &src.path().join("movie.mkv"),
        out.path(),
    )
    .await;

    assert_eq!(sent.bytes, 1_000_000);
    assert_eq!(received.integrity, Integrity::Verified);
    assert_eq!(received.digest, sent.digest);
    assert_eq!(std::fs::read(&received.path).unwrap(), data);
}

#[tokio::test]
async fn existing_output_gets_recv_name() {
    let url = start_relay().await;
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let data = write_source(src.path(), "f.txt", 1_000);
    std::fs::write(out.path().join("f.txt"), b"keep me").unwrap();

    let (_, received) = transfer(
        &url,
        "collide",
        &config(TransferMode::Pull),
        &src.path().join("f.txt"),
        out.path(),
    )
    .await;

    assert_eq!(received.path, out.path().join("f.recv.txt"));
    assert_eq!(std::fs::read(&received.path).unwrap(), data);
    assert_eq!(std::fs::read(out.path().join("f.txt")).unwrap(), b"keep me");
}

#[tokio::test]
async fn empty_file_transfers() {
    let url = start_relay().await;
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_source(src.path(), "empty.bin", 0);

    let (_, received) = transfer(
        &url,
        "empty",
        &config(TransferMode::Pull),
        &src.path().join("empty.bin"),
        &out.path().join("renamed.bin"),
    )
    .await;

    assert_eq!(received.bytes, 0);
    assert_eq!(received.path, out.path().join("renamed.bin"));
    assert!(std::fs::read(&received.path).unwrap().is_empty());
}
