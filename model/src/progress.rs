use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Progress report a rover sends while executing a mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionProgress {
    pub mission_id: String,
    pub progress_percent: f64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_position: Option<Position>,
}

impl MissionProgress {
    pub fn is_terminal(&self) -> bool {
        self.status == "completed" || self.progress_percent >= 100.0
    }
}
