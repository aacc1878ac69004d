use crate::connection::{self, Connection, INITIAL_SEQ};
use crate::end_point::EndPoint;
use crate::error::LinkError;
use crate::frame::{Flag, Frame, OpTag, Token};
use bytes::Bytes;
use model::{AgentId, MissionId};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};

/// The sequence counter travels as at most four decimal digits.
const MAX_SEQ: u64 = 9999;

/// What a transfer carries: inline text (possibly spanning several chunks) or
/// a file artifact announced by name and then streamed.
#[derive(Debug, Clone)]
pub enum Payload {
    Inline(String),
    Artifact(PathBuf),
}

/// Runs one complete outgoing transfer: open, classify and transmit the
/// payload stop-and-wait, close. All retry handling happens here; the caller
/// sees success or a single structured error.
pub async fn send(
    end_point: &EndPoint,
    peer: SocketAddr,
    agent_id: &AgentId,
    mission: &MissionId,
    op: OpTag,
    payload: &Payload,
) -> Result<(), LinkError> {
    let chunk_len = end_point.config().max_chunk_len();

    match payload {
        Payload::Inline(text) => {
            let chunks = chunk_count(text.len(), chunk_len);
            check_sequence_range(chunks)?;

            let mut conn = connection::open_active(end_point, agent_id, peer).await?;
            debug!("sending {} inline chunk(s) of {} bytes to {:?}", chunks, text.len(), peer);

            let bytes = text.as_bytes();
            if bytes.is_empty() {
                send_acknowledged(end_point, &mut conn, mission, op, &[]).await?;
            } else {
                for chunk in bytes.chunks(chunk_len) {
                    send_acknowledged(end_point, &mut conn, mission, op, chunk).await?;
                }
            }
            connection::close_initiate(end_point, &mut conn, mission).await
        }
        Payload::Artifact(path) => {
            let name = artifact_name(path)?;
            let len = tokio::fs::metadata(path).await?.len();
            // the filename frame rides in front of the content chunks
            check_sequence_range(1 + chunk_count(len as usize, chunk_len))?;

            let mut conn = connection::open_active(end_point, agent_id, peer).await?;
            debug!("sending artifact {} ({} bytes) to {:?}", name, len, peer);

            send_acknowledged(end_point, &mut conn, mission, op, name.as_bytes()).await?;

            let mut file = File::open(path).await?;
            let mut buf = vec![0u8; chunk_len];
            loop {
                let num_read = file.read(&mut buf).await?;
                if num_read == 0 {
                    break;
                }
                send_acknowledged(end_point, &mut conn, mission, op, &buf[..num_read]).await?;
            }
            connection::close_initiate(end_point, &mut conn, mission).await
        }
    }
}

/// Transmits one data frame and blocks until the peer acknowledges it: peer
/// address, `A` flag, ack equal to the just-sent sequence and matching link
/// token all have to line up. Stray frames are discarded without touching the
/// retry budget; timeouts retransmit and consume it.
async fn send_acknowledged(
    end_point: &EndPoint,
    conn: &mut Connection,
    mission: &MissionId,
    op: OpTag,
    chunk: &[u8],
) -> Result<(), LinkError> {
    let token = Token::mission(mission);
    let frame = Frame::data(mission, conn.seq, conn.ack, op, Bytes::copy_from_slice(chunk));
    end_point.send(&frame, conn.peer).await;

    let mut retries = 0;
    while retries < end_point.config().retry_limit {
        match end_point.recv().await {
            Ok((resp, from)) => {
                if from != conn.peer {
                    trace!("discarding frame from {:?} during transfer with {:?}", from, conn.peer);
                    continue;
                }
                if resp.flag == Flag::Ack && resp.ack == conn.seq && resp.token == token {
                    trace!("chunk at seq {} acknowledged", conn.seq);
                    conn.seq += 1;
                    conn.ack = conn.seq;
                    return Ok(());
                }
                debug!("discarding {:?} frame while awaiting ack for seq {}", resp.flag, conn.seq);
            }
            Err(LinkError::Timeout(_)) | Err(LinkError::MalformedFrame(_)) => {
                end_point.send(&frame, conn.peer).await;
                retries += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Err(LinkError::PeerUnreachable(retries))
}

fn chunk_count(len: usize, chunk_len: usize) -> u64 {
    if len == 0 {
        1
    } else {
        len.div_ceil(chunk_len) as u64
    }
}

/// The four-digit sequence field caps how many frames one transfer can carry.
fn check_sequence_range(data_frames: u64) -> Result<(), LinkError> {
    // data frames plus the close land on INITIAL_SEQ + data_frames + 1
    if INITIAL_SEQ as u64 + data_frames + 1 > MAX_SEQ {
        return Err(LinkError::ProtocolViolation("transfer exceeds the sequence number range"));
    }
    Ok(())
}

/// Receivers classify a first frame whose body ends in `.json` as a file
/// artifact, so only such names can be announced; and the name is the only
/// part of the path that travels.
fn artifact_name(path: &Path) -> Result<String, LinkError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or(LinkError::ProtocolViolation("artifact path has no usable file name"))?;
    if !name.ends_with(".json") {
        return Err(LinkError::ProtocolViolation("artifact name must end in .json"));
    }
    Ok(name.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::frame::HEADER_OVERHEAD;
    use crate::test_util::{deliver, ScriptedSocket, Step};
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;

    const LOCAL: &str = "10.0.3.10:8080";
    const PEER: &str = "10.0.1.10:8080";

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn agent() -> AgentId {
        AgentId::new("r1").unwrap()
    }

    fn mission() -> MissionId {
        MissionId::new("M01").unwrap()
    }

    /// Endpoint with a small buffer so multi-chunk paths are easy to trigger:
    /// chunk payload is 4 bytes.
    fn end_point(script: Vec<Step>) -> (Arc<ScriptedSocket>, EndPoint) {
        let socket = Arc::new(ScriptedSocket::new(addr(LOCAL), script));
        let config = Arc::new(LinkConfig {
            buffer_size: HEADER_OVERHEAD + 4,
            receive_timeout: Duration::from_millis(100),
            ..Default::default()
        });
        (socket.clone(), EndPoint::new(socket, config))
    }

    fn open_ack() -> Step {
        deliver(&Frame::open_ack_echo(&Frame::open_req(&agent(), INITIAL_SEQ)), addr(PEER))
    }

    fn ack(seq: u32) -> Step {
        deliver(&Frame::control(Flag::Ack, &mission(), seq, seq), addr(PEER))
    }

    fn peer_close(seq: u32) -> Step {
        deliver(&Frame::control(Flag::Close, &mission(), seq, seq), addr(PEER))
    }

    fn sent_bodies(socket: &ScriptedSocket) -> Vec<Vec<u8>> {
        socket.sent_frames().into_iter().map(|(_, frame)| frame).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_frame_inline() {
        let (socket, end_point) = end_point(vec![open_ack(), ack(101), peer_close(102)]);

        send(&end_point, addr(PEER), &agent(), &mission(), OpTag::Progress, &Payload::Inline("{}".to_owned()))
            .await
            .unwrap();

        let sent = sent_bodies(&socket);
        assert_eq!(
            sent,
            vec![
                b"S|r1|100|0|_|0|-.-".to_vec(),
                b"A|r1|100|100|_|0|-.-".to_vec(),
                b"D|M01|101|101|2|P|{}".to_vec(),
                b"F|M01|102|102|1|N|\0".to_vec(),
                b"A|M01|103|102|1|N|\0".to_vec(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_multi_chunk_inline_is_stop_and_wait() {
        let (socket, end_point) = end_point(vec![
            open_ack(),
            ack(101),
            ack(102),
            ack(103),
            peer_close(104),
        ]);

        send(
            &end_point,
            addr(PEER),
            &agent(),
            &mission(),
            OpTag::TaskDeliver,
            &Payload::Inline("abcdefghij".to_owned()),
        )
        .await
        .unwrap();

        let sent = sent_bodies(&socket);
        assert_eq!(sent[2], b"D|M01|101|101|4|T|abcd".to_vec());
        assert_eq!(sent[3], b"D|M01|102|102|4|T|efgh".to_vec());
        assert_eq!(sent[4], b"D|M01|103|103|2|T|ij".to_vec());
        assert_eq!(sent[5], b"F|M01|104|104|1|N|\0".to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_body_of_exactly_one_chunk_is_one_frame() {
        let (socket, end_point) = end_point(vec![open_ack(), ack(101), peer_close(102)]);

        send(&end_point, addr(PEER), &agent(), &mission(), OpTag::Progress, &Payload::Inline("abcd".to_owned()))
            .await
            .unwrap();

        let data_frames = sent_bodies(&socket).iter().filter(|f| f.starts_with(b"D|")).count();
        assert_eq!(data_frames, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_body_one_byte_over_chunk_splits_in_two() {
        let (socket, end_point) = end_point(vec![open_ack(), ack(101), ack(102), peer_close(103)]);

        send(&end_point, addr(PEER), &agent(), &mission(), OpTag::Progress, &Payload::Inline("abcde".to_owned()))
            .await
            .unwrap();

        let sent = sent_bodies(&socket);
        assert_eq!(sent[2], b"D|M01|101|101|4|P|abcd".to_vec());
        assert_eq!(sent[3], b"D|M01|102|102|1|P|e".to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_is_retransmitted_on_timeout() {
        let (socket, end_point) = end_point(vec![open_ack(), Step::Silence, ack(101), peer_close(102)]);

        send(&end_point, addr(PEER), &agent(), &mission(), OpTag::Progress, &Payload::Inline("{}".to_owned()))
            .await
            .unwrap();

        let sent = sent_bodies(&socket);
        let data_frames: Vec<_> = sent.iter().filter(|f| f.starts_with(b"D|")).collect();
        assert_eq!(data_frames.len(), 2);
        assert_eq!(data_frames[0], data_frames[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stray_ack_does_not_trigger_retransmission() {
        let (socket, end_point) = end_point(vec![
            open_ack(),
            deliver(&Frame::control(Flag::Ack, &mission(), 999, 999), addr(PEER)),
            ack(101),
            peer_close(102),
        ]);

        send(&end_point, addr(PEER), &agent(), &mission(), OpTag::Progress, &Payload::Inline("{}".to_owned()))
            .await
            .unwrap();

        let data_frames = sent_bodies(&socket).iter().filter(|f| f.starts_with(b"D|")).count();
        assert_eq!(data_frames, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_chunk_exhausts_the_budget() {
        let (_, end_point) = end_point(vec![open_ack()]);

        let err = send(&end_point, addr(PEER), &agent(), &mission(), OpTag::Progress, &Payload::Inline("{}".to_owned()))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::PeerUnreachable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_artifact_sends_name_then_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        std::fs::File::create(&path).unwrap().write_all(b"abcdef").unwrap();

        let (socket, end_point) = end_point(vec![
            open_ack(),
            ack(101),
            ack(102),
            ack(103),
            peer_close(104),
        ]);

        send(&end_point, addr(PEER), &agent(), &mission(), OpTag::TaskDeliver, &Payload::Artifact(path))
            .await
            .unwrap();

        let sent = sent_bodies(&socket);
        assert_eq!(sent[2], b"D|M01|101|101|6|T|m.json".to_vec());
        assert_eq!(sent[3], b"D|M01|102|102|4|T|abcd".to_vec());
        assert_eq!(sent[4], b"D|M01|103|103|2|T|ef".to_vec());
    }

    #[tokio::test]
    async fn test_artifact_name_must_end_in_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.txt");
        std::fs::File::create(&path).unwrap();

        let (_, end_point) = end_point(vec![]);
        let err = send(&end_point, addr(PEER), &agent(), &mission(), OpTag::TaskDeliver, &Payload::Artifact(path))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn test_oversized_transfer_is_refused_before_opening() {
        let (socket, end_point) = end_point(vec![]);

        let err = send(
            &end_point,
            addr(PEER),
            &agent(),
            &mission(),
            OpTag::Progress,
            &Payload::Inline("x".repeat(50_000)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LinkError::ProtocolViolation(_)));
        assert!(socket.sent_frames().is_empty());
    }
}
