//! Shared data model for the rover fleet: identity tokens and the JSON
//! schemas exchanged between rovers and the mother-ship.

pub mod ident;
pub mod mission;
pub mod progress;
pub mod telemetry;

pub use ident::{AgentId, MissionId, TokenError};
pub use mission::{GeographicArea, Mission, MissionStatus, ValidationError};
pub use progress::{MissionProgress, Position};
pub use telemetry::TelemetryReport;
