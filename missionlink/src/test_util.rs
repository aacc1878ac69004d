//! Scripted stand-in for the datagram socket: replays a fixed inbound
//! conversation and records everything sent. Combined with a paused tokio
//! runtime, `Silence` steps let receive timeouts fire instantly.

use crate::end_point::DatagramSocket;
use crate::frame::Frame;
use async_trait::async_trait;
use bytes::BytesMut;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

pub enum Step {
    /// One raw datagram observed from the given peer.
    Deliver(Vec<u8>, SocketAddr),
    /// No traffic: the receive blocks until the caller's timeout fires.
    Silence,
}

pub fn deliver(frame: &Frame, from: SocketAddr) -> Step {
    Step::Deliver(wire(frame), from)
}

pub fn wire(frame: &Frame) -> Vec<u8> {
    let mut buf = BytesMut::new();
    frame.encode(&mut buf);
    buf.to_vec()
}

pub struct ScriptedSocket {
    script: Mutex<VecDeque<Step>>,
    sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
    local: SocketAddr,
}

impl ScriptedSocket {
    pub fn new(local: SocketAddr, script: Vec<Step>) -> ScriptedSocket {
        ScriptedSocket {
            script: Mutex::new(script.into()),
            sent: Mutex::new(Vec::new()),
            local,
        }
    }

    /// Everything sent so far, in order.
    pub fn sent_frames(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DatagramSocket for ScriptedSocket {
    async fn send_frame(&self, to: SocketAddr, frame: &[u8]) {
        self.sent.lock().unwrap().push((to, frame.to_vec()));
    }

    async fn recv_frame(&self, _max_len: usize) -> std::io::Result<(Vec<u8>, SocketAddr)> {
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Deliver(bytes, from)) => Ok((bytes, from)),
            Some(Step::Silence) | None => {
                // outlives any realistic receive timeout; the caller's
                // timeout cancels this sleep
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "scripted silence"))
            }
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }
}
