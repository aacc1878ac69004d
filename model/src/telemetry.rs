use crate::progress::Position;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One periodic telemetry snapshot. Rovers attach free-form readings beyond
/// the fixed fields, so unknown keys are preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReport {
    pub rover_id: String,
    pub timestamp: u64,
    pub position: Position,
    pub battery: f64,
    pub operational_status: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TelemetryReport {
    /// Canonical artifact name: `telemetry_<rover-id>_<epoch-seconds>.json`.
    pub fn file_name(&self) -> String {
        format!("telemetry_{}_{}.json", self.rover_id, self.timestamp)
    }
}
