use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::frame::Frame;
use async_trait::async_trait;
use bytes::BytesMut;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info};

/// Abstraction over the bound datagram socket, introduced to mock the I/O
/// part away for testing. Whole frames go in and out; the transport is
/// assumed to preserve datagram boundaries.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramSocket: Send + Sync + 'static {
    /// Sends one frame. Send errors are not recoverable at this level; they
    /// are logged and treated like a lost datagram, which the retransmission
    /// machinery above already handles.
    async fn send_frame(&self, to: SocketAddr, frame: &[u8]);

    /// Receives one whole datagram of at most `max_len` bytes together with
    /// the observed peer address.
    async fn recv_frame(&self, max_len: usize) -> std::io::Result<(Vec<u8>, SocketAddr)>;

    fn local_addr(&self) -> SocketAddr;
}

#[async_trait]
impl DatagramSocket for Arc<UdpSocket> {
    async fn send_frame(&self, to: SocketAddr, frame: &[u8]) {
        if let Err(e) = self.send_to(frame, to).await {
            error!("error sending frame to {:?}: {}", to, e);
        }
    }

    async fn recv_frame(&self, max_len: usize) -> std::io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; max_len];
        let (num_read, from) = self.recv_from(&mut buf).await?;
        buf.truncate(num_read);
        Ok((buf, from))
    }

    fn local_addr(&self) -> SocketAddr {
        self.as_ref().local_addr()
            .expect("UdpSocket should have an initialized local addr")
    }
}

/// One bound datagram socket plus its configuration: the place every frame of
/// every transfer passes through. Frames are decoded here, at the boundary,
/// so the state machines above only ever see structured values.
pub struct EndPoint {
    socket: Arc<dyn DatagramSocket>,
    config: Arc<LinkConfig>,
}

impl EndPoint {
    pub async fn bind(bind_addr: SocketAddr, config: Arc<LinkConfig>) -> anyhow::Result<EndPoint> {
        config.validate()?;
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        info!("bound MissionLink endpoint to {:?}", socket.local_addr());
        Ok(EndPoint { socket: Arc::new(socket), config })
    }

    /// Seam for tests and alternative transports.
    pub fn new(socket: Arc<dyn DatagramSocket>, config: Arc<LinkConfig>) -> EndPoint {
        EndPoint { socket, config }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    pub async fn send(&self, frame: &Frame, to: SocketAddr) {
        let mut buf = BytesMut::with_capacity(self.config.buffer_size);
        frame.encode(&mut buf);
        self.socket.send_frame(to, &buf).await;
    }

    /// Receives and decodes one frame within the configured receive timeout.
    /// Socket-level receive errors do not consume the timeout budget; a
    /// malformed datagram surfaces as `MalformedFrame` and leaves the caller
    /// to decide whether it counts.
    pub async fn recv(&self) -> Result<(Frame, SocketAddr), LinkError> {
        let deadline = Instant::now() + self.config.receive_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LinkError::Timeout(self.config.receive_timeout));
            }
            match timeout(remaining, self.socket.recv_frame(self.config.buffer_size)).await {
                Err(_) => return Err(LinkError::Timeout(self.config.receive_timeout)),
                Ok(Err(e)) => {
                    error!("socket receive error: {}", e);
                    continue;
                }
                Ok(Ok((raw, from))) => {
                    let frame = Frame::decode(&raw)?;
                    debug!("received {:?} frame from {:?}", frame.flag, from);
                    return Ok((frame, from));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Flag, OpTag};
    use bytes::Bytes;
    use model::MissionId;
    use std::time::Duration;

    fn test_config() -> Arc<LinkConfig> {
        Arc::new(LinkConfig { receive_timeout: Duration::from_millis(50), ..Default::default() })
    }

    #[tokio::test]
    async fn test_send_encodes_the_frame() {
        let peer: SocketAddr = "10.0.1.10:8080".parse().unwrap();

        let mut socket = MockDatagramSocket::new();
        socket.expect_send_frame()
            .withf(move |to, frame| *to == peer && frame == b"D|M01|101|101|2|P|{}")
            .once()
            .return_const(());

        let end_point = EndPoint::new(Arc::new(socket), test_config());
        let frame = Frame::data(&MissionId::new("M01").unwrap(), 101, 101, OpTag::Progress, Bytes::from_static(b"{}"));
        end_point.send(&frame, peer).await;
    }

    #[tokio::test]
    async fn test_recv_decodes_and_reports_the_peer() {
        let peer: SocketAddr = "10.0.3.10:8080".parse().unwrap();

        let mut socket = MockDatagramSocket::new();
        socket.expect_recv_frame()
            .returning(move |_| Ok((b"A|M01|102|102|1|N|\0".to_vec(), peer)));

        let end_point = EndPoint::new(Arc::new(socket), test_config());
        let (frame, from) = end_point.recv().await.unwrap();
        assert_eq!(from, peer);
        assert_eq!(frame.flag, Flag::Ack);
        assert_eq!(frame.ack, 102);
    }

    #[tokio::test]
    async fn test_recv_surfaces_malformed_frames() {
        let peer: SocketAddr = "10.0.3.10:8080".parse().unwrap();

        let mut socket = MockDatagramSocket::new();
        socket.expect_recv_frame()
            .returning(move |_| Ok((b"not a frame".to_vec(), peer)));

        let end_point = EndPoint::new(Arc::new(socket), test_config());
        assert!(matches!(end_point.recv().await, Err(LinkError::MalformedFrame(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_times_out() {
        let local: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let socket = crate::test_util::ScriptedSocket::new(local, vec![crate::test_util::Step::Silence]);

        let end_point = EndPoint::new(Arc::new(socket), test_config());
        assert!(matches!(end_point.recv().await, Err(LinkError::Timeout(_))));
    }
}
