use crate::end_point::EndPoint;
use crate::error::LinkError;
use crate::frame::{Flag, Frame, Token};
use model::{AgentId, MissionId};
use std::net::SocketAddr;
use tracing::{debug, trace, warn};

/// Every transfer starts its sequence space here.
pub const INITIAL_SEQ: u32 = 100;

/// State of one open connection: the validated peer and the two counters.
/// Created by one of the open handshakes, destroyed by close or by a retry
/// budget running out.
#[derive(Debug)]
pub struct Connection {
    pub(crate) peer: SocketAddr,
    pub(crate) agent_id: AgentId,
    pub(crate) seq: u32,
    pub(crate) ack: u32,
}

/// Client side of the three-way open. Sends the open request carrying the
/// rover identity in the link-token field, waits for the server's echo, and
/// confirms. Returns with both counters past the initial sequence, ready for
/// the first data frame.
pub async fn open_active(
    end_point: &EndPoint,
    agent_id: &AgentId,
    peer: SocketAddr,
) -> Result<Connection, LinkError> {
    let open_req = Frame::open_req(agent_id, INITIAL_SEQ);
    let mut retries = 0;

    end_point.send(&open_req, peer).await;
    while retries < end_point.config().retry_limit {
        match end_point.recv().await {
            Ok((frame, from)) => {
                if from != peer {
                    trace!("discarding frame from {:?} while opening to {:?}", from, peer);
                    continue;
                }
                if frame.flag == Flag::OpenAck && frame.token == open_req.token {
                    end_point.send(&Frame::handshake_ack(agent_id, INITIAL_SEQ), peer).await;
                    debug!("connection to {:?} open for {:?}", peer, agent_id);
                    return Ok(Connection {
                        peer,
                        agent_id: agent_id.clone(),
                        seq: INITIAL_SEQ + 1,
                        ack: INITIAL_SEQ + 1,
                    });
                }
                debug!("discarding {:?} frame while awaiting open-ack from {:?}", frame.flag, peer);
            }
            Err(LinkError::Timeout(_)) => {
                retries += 1;
                end_point.send(&open_req, peer).await;
            }
            Err(LinkError::MalformedFrame(reason)) => {
                debug!("discarding malformed frame while opening: {}", reason);
            }
            Err(e) => return Err(e),
        }
    }
    warn!("open to {:?} failed after {} retries", peer, retries);
    Err(LinkError::PeerUnreachable(retries))
}

/// Server side of the three-way open. Waits one receive-timeout slice for an
/// open request (so a serving loop stays responsive), echoes it with the flag
/// rewritten, and re-emits the cached echo until the client's confirmation
/// arrives.
pub async fn open_passive(end_point: &EndPoint) -> Result<Connection, LinkError> {
    let (open_req, peer) = loop {
        match end_point.recv().await {
            Ok((frame, from)) if frame.flag == Flag::OpenReq => break (frame, from),
            Ok((frame, from)) => {
                debug!("ignoring {:?} frame from {:?} while awaiting an open request", frame.flag, from);
            }
            Err(LinkError::MalformedFrame(reason)) => {
                debug!("discarding malformed frame while awaiting an open request: {}", reason);
            }
            Err(e) => return Err(e),
        }
    };

    let agent_id = open_req.token.expect_agent()?;
    let echo = Frame::open_ack_echo(&open_req);
    end_point.send(&echo, peer).await;

    let mut retries = 0;
    while retries < end_point.config().retry_limit {
        match end_point.recv().await {
            Ok((frame, from)) => {
                if from != peer {
                    trace!("discarding frame from {:?} during open with {:?}", from, peer);
                    continue;
                }
                if frame.flag == Flag::Ack && frame.token == open_req.token && frame.ack == frame.seq {
                    debug!("accepted connection from {:?} at {:?}", agent_id, peer);
                    return Ok(Connection { peer, agent_id, seq: frame.seq, ack: frame.ack });
                }
                end_point.send(&echo, peer).await;
                retries += 1;
            }
            Err(LinkError::Timeout(_)) | Err(LinkError::MalformedFrame(_)) => {
                end_point.send(&echo, peer).await;
                retries += 1;
            }
            Err(e) => return Err(e),
        }
    }
    warn!("open from {:?} not confirmed after {} retries", peer, retries);
    Err(LinkError::PeerUnreachable(retries))
}

/// Sending side of the four-way close, entered once the last data frame is
/// acknowledged. The counters already advanced past that frame, so the close
/// goes out at the current sequence; the peer accepts it as `expected + 1`.
/// Accepts either the peer's own close (acknowledge it and terminate) or an
/// ack for ours (keep waiting for the peer's close).
pub async fn close_initiate(
    end_point: &EndPoint,
    conn: &mut Connection,
    mission: &MissionId,
) -> Result<(), LinkError> {
    let token = Token::mission(mission);
    let close = Frame::control(Flag::Close, mission, conn.seq, conn.ack);
    end_point.send(&close, conn.peer).await;

    let mut retries = 0;
    while retries < end_point.config().retry_limit {
        match end_point.recv().await {
            Ok((frame, from)) => {
                if from != conn.peer {
                    trace!("discarding frame from {:?} during close with {:?}", from, conn.peer);
                    continue;
                }
                if frame.token != token {
                    debug!("discarding frame with foreign link token during close");
                    continue;
                }
                match frame.flag {
                    Flag::Close => {
                        conn.ack = frame.seq;
                        conn.seq += 1;
                        end_point.send(&Frame::control(Flag::Ack, mission, conn.seq, conn.ack), conn.peer).await;
                        debug!("connection to {:?} closed", conn.peer);
                        return Ok(());
                    }
                    Flag::Ack if frame.ack == conn.seq => {
                        trace!("close acknowledged by {:?}, awaiting the peer's close", conn.peer);
                    }
                    _ => debug!("discarding {:?} frame during close", frame.flag),
                }
            }
            Err(LinkError::Timeout(_)) | Err(LinkError::MalformedFrame(_)) => {
                end_point.send(&close, conn.peer).await;
                retries += 1;
            }
            Err(e) => return Err(e),
        }
    }
    warn!("close with {:?} not completed after {} retries", conn.peer, retries);
    Err(LinkError::PeerUnreachable(retries))
}

/// Receiving side of the four-way close, entered after the peer's close frame
/// was accepted in the data stream (and the counters advanced over it).
/// Answers with our own close and waits for the final ack.
pub async fn close_respond(
    end_point: &EndPoint,
    conn: &mut Connection,
    mission: &MissionId,
) -> Result<(), LinkError> {
    let token = Token::mission(mission);
    let close = Frame::control(Flag::Close, mission, conn.seq, conn.ack);
    end_point.send(&close, conn.peer).await;

    let mut retries = 0;
    while retries < end_point.config().retry_limit {
        match end_point.recv().await {
            Ok((frame, from)) => {
                if from != conn.peer {
                    trace!("discarding frame from {:?} during close with {:?}", from, conn.peer);
                    continue;
                }
                if frame.token != token {
                    debug!("discarding frame with foreign link token during close");
                    continue;
                }
                match frame.flag {
                    Flag::Ack if frame.ack == conn.seq => {
                        debug!("connection from {:?} closed", conn.peer);
                        return Ok(());
                    }
                    // the peer retransmitted its close: our answer was lost
                    Flag::Close => {
                        end_point.send(&close, conn.peer).await;
                        retries += 1;
                    }
                    _ => debug!("discarding {:?} frame during close", frame.flag),
                }
            }
            Err(LinkError::Timeout(_)) | Err(LinkError::MalformedFrame(_)) => {
                end_point.send(&close, conn.peer).await;
                retries += 1;
            }
            Err(e) => return Err(e),
        }
    }
    warn!("close with {:?} not confirmed after {} retries", conn.peer, retries);
    Err(LinkError::PeerUnreachable(retries))
}
