use anyhow::bail;
use missionlink::{
    recv_transfer, send_transfer, EndPoint, Inbound, InboundPayload, LinkError, OpTag, Payload,
};
use model::{AgentId, Mission, MissionId, MissionProgress, Position};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// The rover's MissionLink side: registration, mission requests, unsolicited
/// delivery handling and progress reporting. One endpoint serves both
/// directions, so transfers serialize through the mutex - the protocol allows
/// only one transfer per peer pair anyway.
pub struct RoverAgent {
    id: AgentId,
    mothership: SocketAddr,
    end_point: Mutex<EndPoint>,
    store_dir: PathBuf,
}

impl RoverAgent {
    pub fn new(id: AgentId, mothership: SocketAddr, end_point: EndPoint, store_dir: PathBuf) -> RoverAgent {
        RoverAgent { id, mothership, end_point: Mutex::new(end_point), store_dir }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// Registers with the mother-ship and waits for its confirmation
    /// transfer.
    pub async fn register(&self) -> anyhow::Result<()> {
        // registration carries the rover identity in the link-token field
        let token = MissionId::new(self.id.as_str())?;
        let attempts = self.retry_limit().await;

        for attempt in 1..=attempts {
            self.send(&token, OpTag::Register, "\0").await?;

            match self.recv_once().await? {
                Some(reply) if reply.op == OpTag::None => {
                    if let InboundPayload::Inline(body) = &reply.payload {
                        if body == "Registered" || body == "Already registered" {
                            info!("registered with the mother-ship as {:?}", self.id);
                            return Ok(());
                        }
                    }
                    debug!("unexpected reply to registration, retrying");
                }
                Some(other) => debug!("ignoring {:?} transfer while awaiting registration reply", other.op),
                None => debug!("no registration reply yet (attempt {}/{})", attempt, attempts),
            }
        }
        bail!("registration with {} failed after {} attempts", self.mothership, attempts)
    }

    /// Asks the mother-ship for a mission. `None` means nothing is pending.
    pub async fn request_mission(&self) -> anyhow::Result<Option<Mission>> {
        self.send(&MissionId::none(), OpTag::TaskRequest, "request").await?;

        let attempts = self.retry_limit().await;
        for _ in 0..attempts {
            match self.recv_once().await? {
                Some(inbound) if inbound.op == OpTag::TaskDeliver => {
                    return Ok(self.accept_delivery(inbound).await);
                }
                Some(inbound) if inbound.op == OpTag::None => {
                    if let InboundPayload::Inline(body) = &inbound.payload {
                        if body == "no_mission" {
                            debug!("no mission pending");
                            return Ok(None);
                        }
                    }
                    debug!("ignoring unrelated reply while awaiting a mission");
                }
                Some(other) => debug!("ignoring {:?} transfer while awaiting a mission", other.op),
                None => {}
            }
        }
        Ok(None)
    }

    /// Blocks for one receive window waiting for an unsolicited mission
    /// delivery.
    pub async fn await_delivery(&self) -> anyhow::Result<Option<Mission>> {
        match self.recv_once().await? {
            Some(inbound) if inbound.op == OpTag::TaskDeliver => Ok(self.accept_delivery(inbound).await),
            Some(other) => {
                debug!("ignoring {:?} transfer while idle", other.op);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Validates a delivered mission and answers the mother-ship: the mission
    /// identifier confirms it, `parse_error` / `invalid` reject it.
    async fn accept_delivery(&self, inbound: Inbound) -> Option<Mission> {
        let text = match &inbound.payload {
            InboundPayload::Inline(text) => text.clone(),
            InboundPayload::Artifact { path, .. } => match tokio::fs::read_to_string(path).await {
                Ok(text) => text,
                Err(e) => {
                    warn!("cannot read delivered mission artifact: {}", e);
                    return None;
                }
            },
        };

        let mission = match serde_json::from_str::<Mission>(&text) {
            Ok(mission) => mission,
            Err(e) => {
                warn!("delivered mission does not parse: {}", e);
                self.answer(&inbound, "parse_error").await;
                return None;
            }
        };
        if let Err(e) = mission.validate() {
            warn!("delivered mission is invalid: {}", e);
            self.answer(&inbound, "invalid").await;
            return None;
        }

        info!("accepted mission {} ({})", mission.mission_id, mission.task.as_deref().unwrap_or("unspecified"));
        self.answer(&inbound, &mission.mission_id.clone()).await;
        Some(mission)
    }

    /// Reports progress and waits for the mother-ship's acknowledgment
    /// transfer.
    pub async fn report_progress(&self, progress: &MissionProgress) -> anyhow::Result<bool> {
        let mission = MissionId::new(&progress.mission_id)?;
        let json = serde_json::to_string(progress)?;
        self.send(&mission, OpTag::Progress, &json).await?;

        let attempts = self.retry_limit().await;
        for _ in 0..attempts {
            match self.recv_once().await? {
                Some(reply) if reply.op == OpTag::None => {
                    if let InboundPayload::Inline(body) = &reply.payload {
                        if body == "progress_received" {
                            return Ok(true);
                        }
                    }
                }
                Some(other) => debug!("ignoring {:?} transfer while awaiting progress ack", other.op),
                None => {}
            }
        }
        Ok(false)
    }

    /// Simulated execution: step the reported progress on the mission's own
    /// update frequency until it completes.
    pub async fn execute_mission(&self, mission: &Mission) {
        let interval = Duration::from_secs_f64(mission.update_frequency_seconds.unwrap_or(5.0));
        info!("executing mission {} with updates every {:?}", mission.mission_id, interval);

        for progress in progress_plan(mission, 5) {
            tokio::time::sleep(interval).await;
            match self.report_progress(&progress).await {
                Ok(true) => debug!("progress {}% acknowledged", progress.progress_percent),
                Ok(false) => warn!("progress {}% not acknowledged", progress.progress_percent),
                Err(e) => warn!("progress report failed: {}", e),
            }
        }
        info!("mission {} completed", mission.mission_id);
    }

    async fn send(&self, mission: &MissionId, op: OpTag, body: &str) -> Result<(), LinkError> {
        let end_point = self.end_point.lock().await;
        send_transfer(&end_point, self.mothership, &self.id, mission, op, &Payload::Inline(body.to_owned())).await
    }

    async fn answer(&self, inbound: &Inbound, body: &str) {
        let end_point = self.end_point.lock().await;
        if let Err(e) = send_transfer(
            &end_point,
            inbound.peer,
            &self.id,
            &inbound.mission_id,
            OpTag::None,
            &Payload::Inline(body.to_owned()),
        )
        .await
        {
            warn!("answer to the mother-ship failed: {}", e);
        }
    }

    /// One bounded attempt to accept an inbound transfer; `None` on a quiet
    /// timeout slice.
    async fn recv_once(&self) -> Result<Option<Inbound>, LinkError> {
        let end_point = self.end_point.lock().await;
        match recv_transfer(&end_point, &self.store_dir).await {
            Ok(inbound) => Ok(Some(inbound)),
            Err(LinkError::Timeout(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn retry_limit(&self) -> u32 {
        self.end_point.lock().await.config().retry_limit
    }
}

/// The simulated execution plan: `steps` evenly spaced reports, walking the
/// diagonal of the mission area when one is given, ending completed at 100%.
pub fn progress_plan(mission: &Mission, steps: u32) -> Vec<MissionProgress> {
    (1..=steps)
        .map(|i| {
            let fraction = f64::from(i) / f64::from(steps);
            let position = mission.geographic_area.map(|area| Position {
                x: area.x1 + (area.x2 - area.x1) * fraction,
                y: area.y1 + (area.y2 - area.y1) * fraction,
            });
            MissionProgress {
                mission_id: mission.mission_id.clone(),
                progress_percent: (fraction * 100.0).round(),
                status: if i == steps { "completed".to_owned() } else { "in_progress".to_owned() },
                current_position: position,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::GeographicArea;

    fn mission_with_area() -> Mission {
        Mission {
            mission_id: "M01".to_owned(),
            rover_id: "r1".to_owned(),
            geographic_area: Some(GeographicArea { x1: 0.0, y1: 0.0, x2: 10.0, y2: 20.0 }),
            task: Some("capture_images".to_owned()),
            duration_minutes: Some(30.0),
            update_frequency_seconds: Some(120.0),
            priority: None,
            instructions: None,
        }
    }

    #[test]
    fn test_progress_plan_ends_completed_at_full_percent() {
        let plan = progress_plan(&mission_with_area(), 5);
        assert_eq!(plan.len(), 5);
        assert_eq!(plan[0].progress_percent, 20.0);
        assert_eq!(plan[0].status, "in_progress");

        let last = plan.last().unwrap();
        assert_eq!(last.progress_percent, 100.0);
        assert_eq!(last.status, "completed");
        assert!(last.is_terminal());
    }

    #[test]
    fn test_progress_plan_walks_the_area_diagonal() {
        let plan = progress_plan(&mission_with_area(), 4);
        let mid = plan[1].current_position.unwrap();
        assert_eq!(mid.x, 5.0);
        assert_eq!(mid.y, 10.0);

        let end = plan[3].current_position.unwrap();
        assert_eq!(end.x, 10.0);
        assert_eq!(end.y, 20.0);
    }

    #[test]
    fn test_progress_plan_without_area_has_no_positions() {
        let mission = Mission { geographic_area: None, ..mission_with_area() };
        assert!(progress_plan(&mission, 3).iter().all(|p| p.current_position.is_none()));
    }
}
