use crate::frame::{Flag, OpTag};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Everything that can go wrong on a MissionLink transfer. All variants are
/// non-fatal to the loop that owns the endpoint; `PeerUnreachable` tears down
/// the affected transfer only.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    #[error("unexpected flag {0:?}")]
    UnexpectedFlag(Flag),

    #[error("unexpected operation tag {0:?}")]
    UnexpectedOperation(OpTag),

    #[error("sequence mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u32, actual: u32 },

    #[error("frame from {actual} does not belong to transfer peer {expected}")]
    PeerMismatch { expected: SocketAddr, actual: SocketAddr },

    #[error("link token `{actual}` does not match transfer token `{expected}`")]
    IdentityMismatch { expected: String, actual: String },

    #[error("no frame received within {0:?}")]
    Timeout(Duration),

    #[error("peer unreachable after {0} retries")]
    PeerUnreachable(u32),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("protocol invariant violated: {0}")]
    ProtocolViolation(&'static str),
}
