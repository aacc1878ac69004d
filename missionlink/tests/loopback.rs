//! End-to-end transfers over real localhost sockets: both endpoints run the
//! full protocol against each other, including a lossy variant that drops
//! frames to exercise the retransmission machinery.

use async_trait::async_trait;
use missionlink::{
    recv_transfer, send_transfer, DatagramSocket, EndPoint, Inbound, InboundPayload, LinkConfig,
    LinkError, OpTag, Payload,
};
use model::{AgentId, MissionId};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

fn test_config() -> Arc<LinkConfig> {
    Arc::new(LinkConfig {
        receive_timeout: Duration::from_millis(200),
        ..Default::default()
    })
}

async fn bound_end_point() -> EndPoint {
    EndPoint::bind("127.0.0.1:0".parse().unwrap(), test_config())
        .await
        .unwrap()
}

/// Accepts transfers until one completes; open timeouts just mean the client
/// has not started yet.
fn spawn_receiver(end_point: EndPoint, store_dir: &Path) -> JoinHandle<Inbound> {
    let store_dir = store_dir.to_path_buf();
    tokio::spawn(async move {
        loop {
            match recv_transfer(&end_point, &store_dir).await {
                Ok(inbound) => return inbound,
                Err(LinkError::Timeout(_)) => continue,
                Err(e) => panic!("receive failed: {}", e),
            }
        }
    })
}

#[tokio::test]
async fn test_register_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let server = bound_end_point().await;
    let server_addr = server.local_addr();
    let receiver = spawn_receiver(server, dir.path());

    let client = bound_end_point().await;
    let agent = AgentId::new("r1").unwrap();
    send_transfer(
        &client,
        server_addr,
        &agent,
        &MissionId::new(agent.as_str()).unwrap(),
        OpTag::Register,
        &Payload::Inline("\0".to_owned()),
    )
    .await
    .unwrap();

    let inbound = receiver.await.unwrap();
    assert_eq!(inbound.agent_id, agent);
    assert_eq!(inbound.op, OpTag::Register);
    assert_eq!(inbound.peer.ip(), client.local_addr().ip());
    match inbound.payload {
        InboundPayload::Inline(text) => assert_eq!(text, ""),
        other => panic!("expected inline payload, got {:?}", other),
    }
}

#[tokio::test]
async fn test_multi_chunk_inline_reassembles_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let server = bound_end_point().await;
    let server_addr = server.local_addr();
    let receiver = spawn_receiver(server, dir.path());

    // 3000 bytes is three chunks at the default 1001-byte chunk payload
    let body: String = (0..3000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();

    let client = bound_end_point().await;
    send_transfer(
        &client,
        server_addr,
        &AgentId::new("r2").unwrap(),
        &MissionId::new("M07").unwrap(),
        OpTag::Progress,
        &Payload::Inline(body.clone()),
    )
    .await
    .unwrap();

    let inbound = receiver.await.unwrap();
    assert_eq!(inbound.mission_id.as_str(), "M07");
    match inbound.payload {
        InboundPayload::Inline(text) => assert_eq!(text, body),
        other => panic!("expected inline payload, got {:?}", other),
    }
}

#[tokio::test]
async fn test_file_artifact_is_byte_identical() {
    let send_dir = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();

    let content: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    let source = send_dir.path().join("mission_M01.json");
    std::fs::write(&source, &content).unwrap();

    let server = bound_end_point().await;
    let server_addr = server.local_addr();
    let receiver = spawn_receiver(server, store_dir.path());

    let client = bound_end_point().await;
    send_transfer(
        &client,
        server_addr,
        &AgentId::new("r1").unwrap(),
        &MissionId::new("M01").unwrap(),
        OpTag::TaskDeliver,
        &Payload::Artifact(source),
    )
    .await
    .unwrap();

    let inbound = receiver.await.unwrap();
    match inbound.payload {
        InboundPayload::Artifact { name, path } => {
            assert_eq!(name, "mission_M01.json");
            assert_eq!(std::fs::read(path).unwrap(), content);
        }
        other => panic!("expected artifact payload, got {:?}", other),
    }
}

/// Socket wrapper that swallows selected outbound data frames once, as if the
/// network had dropped them.
struct LossySocket {
    inner: Arc<UdpSocket>,
    data_frames_seen: AtomicUsize,
    drop_nth_data_frame: usize,
}

#[async_trait]
impl DatagramSocket for LossySocket {
    async fn send_frame(&self, to: SocketAddr, frame: &[u8]) {
        if frame.starts_with(b"D|") {
            let n = self.data_frames_seen.fetch_add(1, Ordering::SeqCst);
            if n == self.drop_nth_data_frame {
                return;
            }
        }
        let _ = self.inner.send_to(frame, to).await;
    }

    async fn recv_frame(&self, max_len: usize) -> std::io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; max_len];
        let (num_read, from) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(num_read);
        Ok((buf, from))
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }
}

#[tokio::test]
async fn test_dropped_chunk_is_retransmitted_without_duplication() {
    let send_dir = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();

    let content: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
    let source = send_dir.path().join("telemetry_r1_1700000000.json");
    std::fs::write(&source, &content).unwrap();

    let server = bound_end_point().await;
    let server_addr = server.local_addr();
    let receiver = spawn_receiver(server, store_dir.path());

    // drop the second data frame (the first content chunk after the name)
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let lossy = Arc::new(LossySocket {
        inner: socket,
        data_frames_seen: AtomicUsize::new(0),
        drop_nth_data_frame: 1,
    });
    let client = EndPoint::new(lossy, test_config());

    send_transfer(
        &client,
        server_addr,
        &AgentId::new("r1").unwrap(),
        &MissionId::new("000").unwrap(),
        OpTag::Progress,
        &Payload::Artifact(source),
    )
    .await
    .unwrap();

    let inbound = receiver.await.unwrap();
    match inbound.payload {
        InboundPayload::Artifact { path, .. } => {
            assert_eq!(std::fs::read(path).unwrap(), content);
        }
        other => panic!("expected artifact payload, got {:?}", other),
    }
}
