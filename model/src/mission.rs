use crate::ident::{AgentId, MissionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing or invalid field: {0}")]
    Field(&'static str),
    #[error("{0} must be greater than zero")]
    NonPositive(&'static str),
    #[error("geographic area requires x1 < x2 and y1 < y2")]
    DegenerateArea,
}

/// Rectangular exploration area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeographicArea {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// A mission as delivered to a rover. The protocol only requires the mission
/// identifier and the assigned rover; everything else is advisory payload for
/// the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub mission_id: String,
    pub rover_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geographic_area: Option<GeographicArea>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_frequency_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl Mission {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if MissionId::new(&self.mission_id).is_err() {
            return Err(ValidationError::Field("mission_id"));
        }
        if AgentId::new(&self.rover_id).is_err() {
            return Err(ValidationError::Field("rover_id"));
        }
        if let Some(d) = self.duration_minutes {
            if d <= 0.0 {
                return Err(ValidationError::NonPositive("duration_minutes"));
            }
        }
        if let Some(f) = self.update_frequency_seconds {
            if f <= 0.0 {
                return Err(ValidationError::NonPositive("update_frequency_seconds"));
            }
        }
        if let Some(area) = &self.geographic_area {
            if area.x1 >= area.x2 || area.y1 >= area.y2 {
                return Err(ValidationError::DegenerateArea);
            }
        }
        Ok(())
    }

    pub fn mission_id(&self) -> MissionId {
        MissionId::new(&self.mission_id).expect("validated mission id")
    }

    pub fn rover_id(&self) -> AgentId {
        AgentId::new(&self.rover_id).expect("validated rover id")
    }
}

/// Lifecycle of a mission as seen by the mother-ship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionStatus {
    Pending,
    Active,
    Completed,
}

impl MissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionStatus::Pending => "pending",
            MissionStatus::Active => "active",
            MissionStatus::Completed => "completed",
        }
    }
}
