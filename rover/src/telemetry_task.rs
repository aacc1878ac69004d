use model::{AgentId, Position, TelemetryReport};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use telemetrystream::send_file;
use tracing::{debug, warn};

/// Periodic telemetry: synthesize a snapshot, write it locally under the
/// canonical name, upload it over TelemetryStream. Each upload is its own
/// connection.
pub struct TelemetrySender {
    rover_id: AgentId,
    server: SocketAddr,
    local_dir: PathBuf,
    interval: Duration,
    buffer_size: usize,
    state: SensorState,
}

/// The simulated sensor package drifts deterministically; real readings
/// would be wired in here.
struct SensorState {
    battery: f64,
    position: Position,
}

impl TelemetrySender {
    pub fn new(
        rover_id: AgentId,
        server: SocketAddr,
        local_dir: PathBuf,
        interval: Duration,
        buffer_size: usize,
    ) -> TelemetrySender {
        TelemetrySender {
            rover_id,
            server,
            local_dir,
            interval,
            buffer_size,
            state: SensorState { battery: 100.0, position: Position { x: 0.0, y: 0.0 } },
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.local_dir).await?;
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;

            let report = self.next_report(epoch_seconds());
            let path = self.local_dir.join(report.file_name());
            tokio::fs::write(&path, serde_json::to_vec_pretty(&report)?).await?;

            match send_file(self.server, &path, self.buffer_size).await {
                Ok(()) => debug!("uploaded {}", report.file_name()),
                Err(e) => warn!("telemetry upload failed: {}", e),
            }
        }
    }

    fn next_report(&mut self, timestamp: u64) -> TelemetryReport {
        self.state.battery = (self.state.battery - 0.5).max(5.0);
        self.state.position.x += 0.1;
        self.state.position.y += 0.05;

        let operational_status = if self.state.battery < 20.0 { "low_power" } else { "nominal" };

        let mut extra = BTreeMap::new();
        extra.insert("velocity".to_owned(), serde_json::json!(1.2));
        extra.insert("temperature".to_owned(), serde_json::json!(-40.5 + self.state.position.x));

        TelemetryReport {
            rover_id: self.rover_id.as_str().to_owned(),
            timestamp,
            position: self.state.position,
            battery: self.state.battery,
            operational_status: operational_status.to_owned(),
            extra,
        }
    }
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
