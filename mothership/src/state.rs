use model::{AgentId, Mission, MissionId, MissionProgress, MissionStatus};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::path::Path;
use tracing::{info, warn};

/// One mission the mother-ship knows about, with whatever progress the
/// assigned rover has reported so far.
#[derive(Debug, Clone)]
pub struct MissionRecord {
    pub mission: Mission,
    pub status: MissionStatus,
    pub progress: FxHashMap<AgentId, MissionProgress>,
}

impl MissionRecord {
    fn new(mission: Mission, status: MissionStatus) -> MissionRecord {
        MissionRecord { mission, status, progress: FxHashMap::default() }
    }
}

/// Mission and progress state. Owned by the dispatcher, which is its single
/// writer; the observation surface reads through the shared lock.
#[derive(Debug, Default)]
pub struct MissionStore {
    missions: FxHashMap<MissionId, MissionRecord>,
    pending: VecDeque<Mission>,
}

impl MissionStore {
    pub fn new() -> MissionStore {
        MissionStore::default()
    }

    /// Queues a validated mission for delivery on the next mission request.
    pub fn queue_pending(&mut self, mission: Mission) {
        self.missions
            .insert(mission.mission_id(), MissionRecord::new(mission.clone(), MissionStatus::Pending));
        self.pending.push_back(mission);
    }

    pub fn pop_pending(&mut self) -> Option<Mission> {
        self.pending.pop_front()
    }

    /// Puts a mission back at the head of the queue after a failed delivery.
    pub fn requeue_front(&mut self, mission: Mission) {
        self.pending.push_front(mission);
    }

    pub fn mark_delivered(&mut self, mission: &Mission) {
        self.missions
            .entry(mission.mission_id())
            .or_insert_with(|| MissionRecord::new(mission.clone(), MissionStatus::Active))
            .status = MissionStatus::Active;
    }

    /// Stores a progress report keyed by (mission, rover). Reports for
    /// missions this store never saw delivered still count; the record is
    /// created from what the report carries.
    pub fn record_progress(&mut self, mission_id: &MissionId, agent: &AgentId, progress: MissionProgress) {
        let record = self.missions.entry(mission_id.clone()).or_insert_with(|| {
            MissionRecord::new(
                Mission {
                    mission_id: mission_id.as_str().to_owned(),
                    rover_id: agent.as_str().to_owned(),
                    geographic_area: None,
                    task: None,
                    duration_minutes: None,
                    update_frequency_seconds: None,
                    priority: None,
                    instructions: None,
                },
                MissionStatus::Active,
            )
        });
        record.status = if progress.is_terminal() { MissionStatus::Completed } else { MissionStatus::Active };
        record.progress.insert(agent.clone(), progress);
    }

    pub fn get(&self, id: &MissionId) -> Option<&MissionRecord> {
        self.missions.get(id)
    }

    pub fn records(&self) -> impl Iterator<Item = &MissionRecord> {
        self.missions.values()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn mission_count(&self) -> usize {
        self.missions.len()
    }

    /// The mission a rover is currently working, if any.
    pub fn current_mission_of(&self, agent: &AgentId) -> Option<&MissionRecord> {
        self.missions
            .values()
            .find(|r| r.status == MissionStatus::Active && r.mission.rover_id == agent.as_str())
    }

    /// Loads a missions file (a single mission object or an array of them),
    /// queueing every valid entry. Invalid entries are logged and skipped.
    pub fn load_missions_file(&mut self, path: &Path) -> anyhow::Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let missions: Vec<Mission> = match serde_json::from_str::<Vec<Mission>>(&content) {
            Ok(list) => list,
            Err(_) => vec![serde_json::from_str::<Mission>(&content)?],
        };

        let mut queued = 0;
        for mission in missions {
            match mission.validate() {
                Ok(()) => {
                    info!("queued mission {} for rover {}", mission.mission_id, mission.rover_id);
                    self.queue_pending(mission);
                    queued += 1;
                }
                Err(e) => warn!("skipping invalid mission {:?}: {}", mission.mission_id, e),
            }
        }
        Ok(queued)
    }
}
