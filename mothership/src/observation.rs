use crate::registry::IdentityRegistry;
use crate::state::{MissionRecord, MissionStore};
use model::{AgentId, MissionStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use warp::http::StatusCode;
use warp::Filter;

/// Read-only projections of the registry, the mission state and the stored
/// telemetry artifacts. Writes stay with the dispatcher; everything here
/// works on snapshots.
pub struct ObservationState {
    pub registry: Arc<IdentityRegistry>,
    pub store: Arc<RwLock<MissionStore>>,
    pub telemetry_root: PathBuf,
}

pub async fn serve(state: Arc<ObservationState>, addr: SocketAddr) -> anyhow::Result<()> {
    info!("observation surface listening on {:?}", addr);
    warp::serve(routes(state)).run(addr).await;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct MissionQuery {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelemetryQuery {
    rover_id: Option<String>,
    limit: Option<usize>,
}

fn routes(
    state: Arc<ObservationState>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let index = warp::path::end().and(warp::get()).map(|| {
        warp::reply::json(&json!({
            "service": "mother-ship observation surface",
            "endpoints": ["/health", "/rovers", "/rovers/<id>", "/missions", "/missions/<id>", "/telemetry", "/telemetry/<rover_id>", "/status"],
        }))
    });

    let health = warp::path!("health")
        .and(warp::get())
        .map(|| warp::reply::json(&json!({"status": "ok"})));

    let rovers = warp::path!("rovers")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(list_rovers);

    let rover = warp::path!("rovers" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_rover);

    let missions = warp::path!("missions")
        .and(warp::get())
        .and(warp::query::<MissionQuery>())
        .and(with_state(state.clone()))
        .and_then(list_missions);

    let mission = warp::path!("missions" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_mission);

    let telemetry = warp::path!("telemetry")
        .and(warp::get())
        .and(warp::query::<TelemetryQuery>())
        .and(with_state(state.clone()))
        .and_then(list_telemetry);

    let rover_telemetry = warp::path!("telemetry" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_rover_telemetry);

    let status = warp::path!("status")
        .and(warp::get())
        .and(with_state(state))
        .and_then(system_status);

    index
        .or(health)
        .or(rovers)
        .or(rover)
        .or(missions)
        .or(mission)
        .or(telemetry)
        .or(rover_telemetry)
        .or(status)
}

fn with_state(
    state: Arc<ObservationState>,
) -> impl Filter<Extract = (Arc<ObservationState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

type Response = Result<warp::reply::WithStatus<warp::reply::Json>, Infallible>;

fn ok(value: &impl Serialize) -> Response {
    Ok(warp::reply::with_status(warp::reply::json(value), StatusCode::OK))
}

fn not_found(message: String) -> Response {
    Ok(warp::reply::with_status(
        warp::reply::json(&json!({"error": message})),
        StatusCode::NOT_FOUND,
    ))
}

fn bad_request(message: String) -> Response {
    Ok(warp::reply::with_status(
        warp::reply::json(&json!({"error": message})),
        StatusCode::BAD_REQUEST,
    ))
}

#[derive(Debug, Serialize)]
struct RoverDto {
    rover_id: String,
    address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_mission: Option<String>,
}

#[derive(Debug, Serialize)]
struct MissionDto {
    mission_id: String,
    rover_id: String,
    status: MissionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress_status: Option<String>,
}

fn mission_dto(record: &MissionRecord) -> MissionDto {
    // prefer the assigned rover's report, fall back to any reporter
    let progress = AgentId::new(&record.mission.rover_id)
        .ok()
        .and_then(|id| record.progress.get(&id))
        .or_else(|| record.progress.values().next());

    MissionDto {
        mission_id: record.mission.mission_id.clone(),
        rover_id: record.mission.rover_id.clone(),
        status: record.status,
        task: record.mission.task.clone(),
        progress_percent: progress.map(|p| p.progress_percent),
        progress_status: progress.map(|p| p.status.clone()),
    }
}

async fn list_rovers(state: Arc<ObservationState>) -> Response {
    let store = state.store.read().await;
    let mut rovers: Vec<RoverDto> = state
        .registry
        .snapshot()
        .iter()
        .map(|(id, addr)| RoverDto {
            rover_id: id.as_str().to_owned(),
            address: addr.to_string(),
            current_mission: store.current_mission_of(id).map(|r| r.mission.mission_id.clone()),
        })
        .collect();
    rovers.sort_by(|a, b| a.rover_id.cmp(&b.rover_id));
    ok(&rovers)
}

async fn get_rover(rover_id: String, state: Arc<ObservationState>) -> Response {
    let Ok(id) = AgentId::new(&rover_id) else {
        return not_found(format!("unknown rover: {}", rover_id));
    };
    let Some(addr) = state.registry.get(&id) else {
        return not_found(format!("unknown rover: {}", rover_id));
    };
    let store = state.store.read().await;
    ok(&RoverDto {
        rover_id,
        address: addr.to_string(),
        current_mission: store.current_mission_of(&id).map(|r| r.mission.mission_id.clone()),
    })
}

async fn list_missions(query: MissionQuery, state: Arc<ObservationState>) -> Response {
    let filter = match query.status.as_deref() {
        None => None,
        Some("pending") => Some(MissionStatus::Pending),
        Some("active") => Some(MissionStatus::Active),
        Some("completed") => Some(MissionStatus::Completed),
        Some(other) => return bad_request(format!("unknown status filter: {}", other)),
    };

    let store = state.store.read().await;
    let mut missions: Vec<MissionDto> = store
        .records()
        .filter(|r| filter.map(|f| r.status == f).unwrap_or(true))
        .map(mission_dto)
        .collect();
    missions.sort_by(|a, b| a.mission_id.cmp(&b.mission_id));
    ok(&missions)
}

async fn get_mission(mission_id: String, state: Arc<ObservationState>) -> Response {
    let Ok(id) = model::MissionId::new(&mission_id) else {
        return not_found(format!("unknown mission: {}", mission_id));
    };
    let store = state.store.read().await;
    match store.get(&id) {
        Some(record) => ok(&mission_dto(record)),
        None => not_found(format!("unknown mission: {}", mission_id)),
    }
}

async fn list_telemetry(query: TelemetryQuery, state: Arc<ObservationState>) -> Response {
    let limit = query.limit.unwrap_or(10);
    let entries = scan_telemetry(&state.telemetry_root, query.rover_id.as_deref(), limit).await;
    ok(&entries)
}

async fn get_rover_telemetry(rover_id: String, state: Arc<ObservationState>) -> Response {
    if AgentId::new(&rover_id).is_err() || !state.telemetry_root.join(&rover_id).is_dir() {
        return not_found(format!("no telemetry for rover: {}", rover_id));
    }
    let entries = scan_telemetry(&state.telemetry_root, Some(&rover_id), 10).await;
    ok(&entries)
}

async fn system_status(state: Arc<ObservationState>) -> Response {
    let store = state.store.read().await;
    let (mut active, mut completed) = (0, 0);
    for record in store.records() {
        match record.status {
            MissionStatus::Active => active += 1,
            MissionStatus::Completed => completed += 1,
            MissionStatus::Pending => {}
        }
    }
    ok(&json!({
        "rovers": state.registry.snapshot().len(),
        "missions": store.mission_count(),
        "pending_missions": store.pending_count(),
        "active_missions": active,
        "completed_missions": completed,
    }))
}

#[derive(Debug, Serialize)]
struct TelemetryEntry {
    rover_id: String,
    file: String,
    timestamp: u64,
    data: Value,
}

/// Walks `<root>/<rover-id>/telemetry_*.json`, newest first.
async fn scan_telemetry(root: &Path, rover_filter: Option<&str>, limit: usize) -> Vec<TelemetryEntry> {
    let mut entries = Vec::new();
    let Ok(mut rover_dirs) = tokio::fs::read_dir(root).await else {
        return entries;
    };

    while let Ok(Some(rover_dir)) = rover_dirs.next_entry().await {
        if !rover_dir.path().is_dir() {
            continue;
        }
        let rover_id = rover_dir.file_name().to_string_lossy().into_owned();
        if rover_filter.map(|f| f != rover_id).unwrap_or(false) {
            continue;
        }

        let Ok(mut files) = tokio::fs::read_dir(rover_dir.path()).await else {
            continue;
        };
        while let Ok(Some(file)) = files.next_entry().await {
            let name = file.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".json") {
                continue;
            }
            let Ok(content) = tokio::fs::read(file.path()).await else {
                continue;
            };
            let Ok(data) = serde_json::from_slice::<Value>(&content) else {
                continue;
            };
            entries.push(TelemetryEntry {
                rover_id: rover_id.clone(),
                timestamp: file_timestamp(&name),
                file: name,
                data,
            });
        }
    }

    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    entries.truncate(limit);
    entries
}

/// `telemetry_<rover-id>_<epoch>.json` -> epoch, zero when the name does not
/// follow the convention.
fn file_timestamp(name: &str) -> u64 {
    name.strip_suffix(".json")
        .and_then(|stem| stem.rsplit('_').next())
        .and_then(|epoch| epoch.parse().ok())
        .unwrap_or(0)
}
