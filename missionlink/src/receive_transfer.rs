use crate::connection::{self, Connection};
use crate::end_point::EndPoint;
use crate::error::LinkError;
use crate::frame::{Flag, Frame, OpTag, Token};
use bytes::Bytes;
use model::{AgentId, MissionId};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};

/// What an incoming transfer delivered: reassembled inline text, or a file
/// artifact already written under the receiver's store directory.
#[derive(Debug)]
pub enum InboundPayload {
    Inline(String),
    Artifact { name: String, path: PathBuf },
}

/// One completed incoming transfer.
#[derive(Debug)]
pub struct Inbound {
    pub agent_id: AgentId,
    pub mission_id: MissionId,
    pub op: OpTag,
    pub peer: SocketAddr,
    pub payload: InboundPayload,
}

/// Accepts and runs one incoming transfer to completion: passive open, first
/// frame classification, chunk loop with delayed-write duplicate suppression,
/// close handshake. Returns `Timeout` if no open request arrives within one
/// receive timeout, so serving loops stay responsive.
pub async fn recv(end_point: &EndPoint, store_dir: &Path) -> Result<Inbound, LinkError> {
    let mut conn = connection::open_passive(end_point).await?;

    let first = await_first_frame(end_point, &mut conn).await?;
    let mission = first.token.expect_mission()?;
    let op = first.op;

    // the first frame decides between inline content and a file artifact
    let payload = if first.body.ends_with(b".json") {
        let name = artifact_name(&first.body)?;
        recv_artifact(end_point, &mut conn, &mission, op, store_dir, name).await?
    } else {
        let text = as_text(&first.body)?;
        recv_inline(end_point, &mut conn, &mission, op, text).await?
    };

    Ok(Inbound {
        agent_id: conn.agent_id.clone(),
        mission_id: mission,
        op,
        peer: conn.peer,
        payload,
    })
}

/// Waits for the first data frame of a fresh connection. Only the peer and
/// the sequence can be validated here; the mission token is whatever this
/// frame establishes.
async fn await_first_frame(end_point: &EndPoint, conn: &mut Connection) -> Result<Frame, LinkError> {
    let mut retries = 0;
    while retries < end_point.config().retry_limit {
        match end_point.recv().await {
            Ok((frame, from)) => {
                if from != conn.peer {
                    trace!("discarding frame from {:?} during transfer with {:?}", from, conn.peer);
                    continue;
                }
                if frame.seq != conn.seq + 1 {
                    debug!("discarding frame with sequence {} while expecting {}", frame.seq, conn.seq + 1);
                    continue;
                }
                match frame.flag {
                    Flag::Data => {
                        conn.seq += 1;
                        conn.ack = conn.seq;
                        let mission = frame.token.expect_mission()?;
                        end_point.send(&Frame::control(Flag::Ack, &mission, conn.seq, conn.ack), conn.peer).await;
                        return Ok(frame);
                    }
                    Flag::Close => {
                        warn!("peer {:?} closed before sending any data", conn.peer);
                        return Err(LinkError::ProtocolViolation("close before any data frame"));
                    }
                    other => debug!("discarding {:?} frame while awaiting the first data frame", other),
                }
            }
            Err(LinkError::Timeout(_)) => retries += 1,
            Err(LinkError::MalformedFrame(reason)) => debug!("discarding malformed frame: {}", reason),
            Err(e) => return Err(e),
        }
    }
    Err(LinkError::PeerUnreachable(retries))
}

/// The four per-chunk validators. Field count is already enforced by the
/// decoder, so what is left is peer, link token and sequence, plus the flag
/// and operation tag making sense in the data phase: chunks carry the tag
/// the first frame established, closes carry none.
fn validate_chunk(
    frame: &Frame,
    from: SocketAddr,
    conn: &Connection,
    token: &Token,
    op: OpTag,
) -> Result<(), LinkError> {
    if from != conn.peer {
        return Err(LinkError::PeerMismatch { expected: conn.peer, actual: from });
    }
    if frame.token != *token {
        return Err(LinkError::IdentityMismatch {
            expected: token.as_str().to_owned(),
            actual: frame.token.as_str().to_owned(),
        });
    }
    if frame.seq != conn.seq + 1 {
        return Err(LinkError::SequenceMismatch { expected: conn.seq + 1, actual: frame.seq });
    }
    match frame.flag {
        Flag::Data if frame.op != op => Err(LinkError::UnexpectedOperation(frame.op)),
        Flag::Data | Flag::Close => Ok(()),
        other => Err(LinkError::UnexpectedFlag(other)),
    }
}

/// Inline chunk loop. The first chunk is already committed; every further
/// chunk passes through the one-slot `previous` buffer and is appended only
/// once its successor (or the close) is accepted, so a retransmitted chunk
/// can be re-acknowledged without ever being written twice.
async fn recv_inline(
    end_point: &EndPoint,
    conn: &mut Connection,
    mission: &MissionId,
    op: OpTag,
    first_chunk: String,
) -> Result<InboundPayload, LinkError> {
    let token = Token::mission(mission);
    let mut assembled = first_chunk;
    let mut previous: Option<Bytes> = None;

    let mut retries = 0;
    while retries < end_point.config().retry_limit {
        match end_point.recv().await {
            Ok((frame, from)) => match validate_chunk(&frame, from, conn, &token, op) {
                Ok(()) => {
                    retries = 0;
                    conn.seq += 1;
                    conn.ack = conn.seq;
                    if let Some(prev) = previous.take() {
                        assembled.push_str(as_text(&prev)?.as_str());
                    }
                    if frame.flag == Flag::Close {
                        connection::close_respond(end_point, conn, mission).await?;
                        if assembled.ends_with('\0') {
                            assembled.pop();
                        }
                        return Ok(InboundPayload::Inline(assembled));
                    }
                    previous = Some(frame.body);
                    end_point.send(&Frame::control(Flag::Ack, mission, conn.seq, conn.ack), conn.peer).await;
                }
                Err(LinkError::PeerMismatch { actual, .. }) => {
                    trace!("discarding frame from {:?} during transfer with {:?}", actual, conn.peer);
                }
                Err(reject) => {
                    debug!("rejecting chunk ({}), re-emitting last ack", reject);
                    end_point.send(&Frame::control(Flag::Ack, mission, conn.seq, conn.ack), conn.peer).await;
                }
            },
            Err(LinkError::Timeout(_)) | Err(LinkError::MalformedFrame(_)) => {
                end_point.send(&Frame::control(Flag::Ack, mission, conn.seq, conn.ack), conn.peer).await;
                retries += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Err(LinkError::PeerUnreachable(retries))
}

/// Artifact chunk loop: same discipline as the inline loop with the file as
/// the sink.
async fn recv_artifact(
    end_point: &EndPoint,
    conn: &mut Connection,
    mission: &MissionId,
    op: OpTag,
    store_dir: &Path,
    name: String,
) -> Result<InboundPayload, LinkError> {
    let token = Token::mission(mission);
    tokio::fs::create_dir_all(store_dir).await?;
    let path = store_dir.join(&name);
    let mut file = File::create(&path).await?;
    debug!("receiving artifact {} from {:?}", name, conn.peer);

    let mut previous: Option<Bytes> = None;
    let mut retries = 0;
    while retries < end_point.config().retry_limit {
        match end_point.recv().await {
            Ok((frame, from)) => match validate_chunk(&frame, from, conn, &token, op) {
                Ok(()) => {
                    retries = 0;
                    conn.seq += 1;
                    conn.ack = conn.seq;
                    if let Some(prev) = previous.take() {
                        file.write_all(&prev).await?;
                    }
                    if frame.flag == Flag::Close {
                        file.flush().await?;
                        drop(file);
                        connection::close_respond(end_point, conn, mission).await?;
                        return Ok(InboundPayload::Artifact { name, path });
                    }
                    previous = Some(frame.body);
                    end_point.send(&Frame::control(Flag::Ack, mission, conn.seq, conn.ack), conn.peer).await;
                }
                Err(LinkError::PeerMismatch { actual, .. }) => {
                    trace!("discarding frame from {:?} during transfer with {:?}", actual, conn.peer);
                }
                Err(reject) => {
                    debug!("rejecting chunk ({}), re-emitting last ack", reject);
                    end_point.send(&Frame::control(Flag::Ack, mission, conn.seq, conn.ack), conn.peer).await;
                }
            },
            Err(LinkError::Timeout(_)) | Err(LinkError::MalformedFrame(_)) => {
                end_point.send(&Frame::control(Flag::Ack, mission, conn.seq, conn.ack), conn.peer).await;
                retries += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Err(LinkError::PeerUnreachable(retries))
}

fn as_text(body: &[u8]) -> Result<String, LinkError> {
    String::from_utf8(body.to_vec()).map_err(|_| LinkError::MalformedFrame("inline chunk is not valid UTF-8"))
}

/// Artifact names travel bare and are joined onto the store directory, so
/// anything that could escape it is rejected before any filesystem call.
fn artifact_name(body: &[u8]) -> Result<String, LinkError> {
    let name = std::str::from_utf8(body)
        .map_err(|_| LinkError::MalformedFrame("artifact name is not valid UTF-8"))?;
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
        || name.starts_with('.')
    {
        return Err(LinkError::ProtocolViolation("unsafe artifact name"));
    }
    Ok(name.to_owned())
}
