use crate::registry::IdentityRegistry;
use crate::state::MissionStore;
use missionlink::{
    recv_transfer, send_transfer, EndPoint, Inbound, InboundPayload, LinkError, OpTag, Payload,
};
use model::{AgentId, Mission, MissionId, MissionProgress};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// The MissionLink server loop: accepts one transfer at a time, classifies it
/// by operation tag and runs the matching handler. This is the single writer
/// to both the identity registry and the mission store; no transfer failure
/// ever terminates the loop.
pub struct Dispatcher {
    end_point: EndPoint,
    registry: Arc<IdentityRegistry>,
    store: Arc<RwLock<MissionStore>>,
    artifact_dir: PathBuf,
}

impl Dispatcher {
    pub fn new(
        end_point: EndPoint,
        registry: Arc<IdentityRegistry>,
        store: Arc<RwLock<MissionStore>>,
        artifact_dir: PathBuf,
    ) -> Dispatcher {
        Dispatcher { end_point, registry, store, artifact_dir }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        info!("MissionLink dispatcher serving on {:?}", self.end_point.local_addr());
        loop {
            match recv_transfer(&self.end_point, &self.artifact_dir).await {
                Ok(inbound) => self.dispatch(inbound).await,
                // nobody opened a connection within the timeout slice
                Err(LinkError::Timeout(_)) => continue,
                Err(e) => warn!("inbound transfer failed: {}", e),
            }
        }
    }

    async fn dispatch(&self, inbound: Inbound) {
        // every observed open refreshes the identity mapping, last-writer-wins
        let previously_known = !self.registry.record(&inbound.agent_id, inbound.peer);
        debug!("dispatching {:?} transfer from {:?} at {:?}", inbound.op, inbound.agent_id, inbound.peer);

        match inbound.op {
            OpTag::Register => self.handle_register(&inbound, previously_known).await,
            OpTag::TaskRequest => self.handle_mission_request(&inbound).await,
            OpTag::Progress | OpTag::Metrics => self.handle_progress(&inbound).await,
            OpTag::TaskDeliver => warn!("ignoring task delivery sent by rover {:?}", inbound.agent_id),
            OpTag::None => debug!("transfer without operation from {:?}", inbound.agent_id),
            OpTag::Unspecified => debug!("transfer with placeholder operation from {:?}", inbound.agent_id),
        }
    }

    async fn handle_register(&self, inbound: &Inbound, previously_known: bool) {
        let body = if previously_known { "Already registered" } else { "Registered" };
        info!("rover {:?} registered from {:?}", inbound.agent_id, inbound.peer);
        self.reply(inbound, &MissionId::none(), body).await;
    }

    async fn handle_mission_request(&self, inbound: &Inbound) {
        let pending = self.store.write().await.pop_pending();
        match pending {
            Some(mission) => {
                if self.deliver_mission(inbound.peer, &inbound.agent_id, &mission).await {
                    self.store.write().await.mark_delivered(&mission);
                } else {
                    warn!("delivery of {} failed, returning it to the queue", mission.mission_id);
                    self.store.write().await.requeue_front(mission);
                }
            }
            None => {
                debug!("no pending mission for {:?}", inbound.agent_id);
                self.reply(inbound, &MissionId::none(), "no_mission").await;
            }
        }
    }

    /// Sends a mission as a `T` transfer and waits for the rover's
    /// confirmation transfer, whose body is the mission identifier.
    async fn deliver_mission(&self, to: SocketAddr, agent: &AgentId, mission: &Mission) -> bool {
        let json = match serde_json::to_string(mission) {
            Ok(json) => json,
            Err(e) => {
                warn!("mission {} does not serialize: {}", mission.mission_id, e);
                return false;
            }
        };
        let mission_id = mission.mission_id();

        if let Err(e) =
            send_transfer(&self.end_point, to, agent, &mission_id, OpTag::TaskDeliver, &Payload::Inline(json)).await
        {
            warn!("mission delivery to {:?} failed: {}", agent, e);
            return false;
        }

        match recv_transfer(&self.end_point, &self.artifact_dir).await {
            Ok(confirm) if confirm.agent_id == *agent && confirm.op == OpTag::None => match &confirm.payload {
                InboundPayload::Inline(body) if body == mission_id.as_str() => {
                    info!("mission {} confirmed by {:?}", mission_id, agent);
                    true
                }
                _ => {
                    warn!("rover {:?} rejected mission {}", agent, mission_id);
                    false
                }
            },
            Ok(other) => {
                warn!(
                    "unexpected {:?} transfer from {:?} while awaiting confirmation of {}",
                    other.op, other.agent_id, mission_id
                );
                false
            }
            Err(e) => {
                warn!("no confirmation for mission {}: {}", mission_id, e);
                false
            }
        }
    }

    async fn handle_progress(&self, inbound: &Inbound) {
        let text = match &inbound.payload {
            InboundPayload::Inline(text) => text.clone(),
            InboundPayload::Artifact { path, .. } => match tokio::fs::read_to_string(path).await {
                Ok(text) => text,
                Err(e) => {
                    warn!("cannot read progress artifact from {:?}: {}", inbound.agent_id, e);
                    self.reply(inbound, &inbound.mission_id, "parse_error").await;
                    return;
                }
            },
        };

        match serde_json::from_str::<MissionProgress>(&text) {
            Ok(progress) => {
                info!(
                    "progress for {} from {:?}: {}% ({})",
                    inbound.mission_id, inbound.agent_id, progress.progress_percent, progress.status
                );
                self.store.write().await.record_progress(&inbound.mission_id, &inbound.agent_id, progress);
                self.reply(inbound, &inbound.mission_id, "progress_received").await;
            }
            Err(e) => {
                warn!("unparsable progress report from {:?}: {}", inbound.agent_id, e);
                self.reply(inbound, &inbound.mission_id, "parse_error").await;
            }
        }
    }

    /// Replies are full transfers back to the observed peer address, opened
    /// with the rover's own identity so its listener accepts them.
    async fn reply(&self, inbound: &Inbound, mission: &MissionId, body: &str) {
        let payload = Payload::Inline(body.to_owned());
        if let Err(e) =
            send_transfer(&self.end_point, inbound.peer, &inbound.agent_id, mission, OpTag::None, &payload).await
        {
            warn!("reply to {:?} failed: {}", inbound.agent_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use missionlink::LinkConfig;
    use std::path::Path;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    fn test_config() -> Arc<LinkConfig> {
        Arc::new(LinkConfig { receive_timeout: Duration::from_millis(200), ..Default::default() })
    }

    struct TestServer {
        addr: SocketAddr,
        registry: Arc<IdentityRegistry>,
        store: Arc<RwLock<MissionStore>>,
        handle: JoinHandle<()>,
    }

    async fn spawn_dispatcher(artifact_dir: &Path) -> TestServer {
        let end_point = EndPoint::bind("127.0.0.1:0".parse().unwrap(), test_config()).await.unwrap();
        let addr = end_point.local_addr();
        let registry = Arc::new(IdentityRegistry::new());
        let store = Arc::new(RwLock::new(MissionStore::new()));

        let dispatcher =
            Dispatcher::new(end_point, registry.clone(), store.clone(), artifact_dir.to_path_buf());
        let handle = tokio::spawn(async move {
            dispatcher.run().await.unwrap();
        });
        TestServer { addr, registry, store, handle }
    }

    async fn client_end_point() -> EndPoint {
        EndPoint::bind("127.0.0.1:0".parse().unwrap(), test_config()).await.unwrap()
    }

    /// Sends one inline transfer and returns the server's reply transfer.
    async fn round_trip(
        client: &EndPoint,
        server: SocketAddr,
        agent: &AgentId,
        mission: &MissionId,
        op: OpTag,
        body: &str,
        store_dir: &Path,
    ) -> Inbound {
        send_transfer(client, server, agent, mission, op, &Payload::Inline(body.to_owned()))
            .await
            .unwrap();
        loop {
            match recv_transfer(client, store_dir).await {
                Ok(inbound) => return inbound,
                Err(LinkError::Timeout(_)) => continue,
                Err(e) => panic!("client receive failed: {}", e),
            }
        }
    }

    fn inline_text(inbound: &Inbound) -> &str {
        match &inbound.payload {
            InboundPayload::Inline(text) => text,
            other => panic!("expected inline payload, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_register_updates_registry_and_replies() {
        let dir = tempfile::tempdir().unwrap();
        let server = spawn_dispatcher(dir.path()).await;
        let client = client_end_point().await;
        let r1 = AgentId::new("r1").unwrap();
        let token = MissionId::new("r1").unwrap();

        let reply = round_trip(&client, server.addr, &r1, &token, OpTag::Register, "\0", dir.path()).await;
        assert_eq!(inline_text(&reply), "Registered");
        assert_eq!(server.registry.get(&r1).unwrap().ip(), client.local_addr().ip());

        let reply = round_trip(&client, server.addr, &r1, &token, OpTag::Register, "\0", dir.path()).await;
        assert_eq!(inline_text(&reply), "Already registered");

        server.handle.abort();
    }

    #[tokio::test]
    async fn test_mission_request_without_pending_mission() {
        let dir = tempfile::tempdir().unwrap();
        let server = spawn_dispatcher(dir.path()).await;
        let client = client_end_point().await;
        let r1 = AgentId::new("r1").unwrap();

        let reply =
            round_trip(&client, server.addr, &r1, &MissionId::none(), OpTag::TaskRequest, "request", dir.path()).await;
        assert_eq!(inline_text(&reply), "no_mission");

        server.handle.abort();
    }

    #[tokio::test]
    async fn test_mission_request_delivers_and_confirms() {
        let dir = tempfile::tempdir().unwrap();
        let server = spawn_dispatcher(dir.path()).await;
        let client = client_end_point().await;
        let r1 = AgentId::new("r1").unwrap();

        let mission: Mission = serde_json::from_str(
            r#"{"mission_id":"M01","rover_id":"r1","task":"capture_images","duration_minutes":30,"update_frequency_seconds":120}"#,
        )
        .unwrap();
        server.store.write().await.queue_pending(mission.clone());

        // request: the reply is the mission delivery itself
        let delivery =
            round_trip(&client, server.addr, &r1, &MissionId::none(), OpTag::TaskRequest, "request", dir.path()).await;
        assert_eq!(delivery.op, OpTag::TaskDeliver);
        let delivered: Mission = serde_json::from_str(inline_text(&delivery)).unwrap();
        assert_eq!(delivered, mission);

        // confirm with the mission identifier as body
        send_transfer(
            &client,
            server.addr,
            &r1,
            &mission.mission_id(),
            OpTag::None,
            &Payload::Inline("M01".to_owned()),
        )
        .await
        .unwrap();

        // the dispatcher marks the mission active once confirmed
        for _ in 0..50 {
            if server.store.read().await.get(&mission.mission_id()).map(|r| r.status)
                == Some(model::MissionStatus::Active)
            {
                server.handle.abort();
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("mission never became active");
    }

    #[tokio::test]
    async fn test_progress_report_is_stored_and_acknowledged() {
        let dir = tempfile::tempdir().unwrap();
        let server = spawn_dispatcher(dir.path()).await;
        let client = client_end_point().await;
        let r1 = AgentId::new("r1").unwrap();
        let m01 = MissionId::new("M01").unwrap();

        let progress = r#"{"mission_id":"M01","progress_percent":45,"status":"in_progress","current_position":{"x":25.5,"y":35.2}}"#;
        let reply = round_trip(&client, server.addr, &r1, &m01, OpTag::Progress, progress, dir.path()).await;
        assert_eq!(inline_text(&reply), "progress_received");

        let store = server.store.read().await;
        let record = store.get(&m01).unwrap();
        assert_eq!(record.progress[&r1].progress_percent, 45.0);

        server.handle.abort();
    }

    #[tokio::test]
    async fn test_malformed_progress_gets_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let server = spawn_dispatcher(dir.path()).await;
        let client = client_end_point().await;
        let r1 = AgentId::new("r1").unwrap();
        let m01 = MissionId::new("M01").unwrap();

        let reply = round_trip(&client, server.addr, &r1, &m01, OpTag::Progress, "not json", dir.path()).await;
        assert_eq!(inline_text(&reply), "parse_error");

        server.handle.abort();
    }
}
