mod dispatcher;
mod observation;
mod registry;
mod state;

use clap::Parser;
use dispatcher::Dispatcher;
use missionlink::{EndPoint, LinkConfig};
use observation::ObservationState;
use registry::IdentityRegistry;
use state::MissionStore;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use telemetrystream::StreamServer;
use tokio::select;
use tokio::sync::RwLock;
use tracing::{info, Level};

/// The mother-ship: MissionLink dispatcher, TelemetryStream server and the
/// observation surface, all over one data directory.
#[derive(Parser)]
struct Args {
    /// Address to bind all three servers on
    #[clap(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    #[clap(long, default_value_t = 8080)]
    datagram_port: u16,

    #[clap(long, default_value_t = 8081)]
    stream_port: u16,

    #[clap(long, default_value_t = 8082)]
    observation_port: u16,

    /// Receive timeout in seconds for MissionLink transfers
    #[clap(long, default_value_t = 2)]
    receive_timeout_s: u64,

    #[clap(long, default_value_t = 5)]
    retry_limit: u32,

    #[clap(long, default_value_t = 1024)]
    buffer_size: usize,

    /// Where received telemetry and mission artifacts are stored
    #[clap(long, default_value = "mothership-data")]
    data_dir: PathBuf,

    /// Missions file to preload into the pending queue
    #[clap(long)]
    missions: Option<PathBuf>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(level).try_init().ok();

    let config = Arc::new(LinkConfig {
        datagram_port: args.datagram_port,
        receive_timeout: Duration::from_secs(args.receive_timeout_s),
        retry_limit: args.retry_limit,
        buffer_size: args.buffer_size,
    });
    config.validate()?;

    let telemetry_root = args.data_dir.join("telemetry");
    let artifact_dir = args.data_dir.join("artifacts");
    tokio::fs::create_dir_all(&artifact_dir).await?;

    let registry = Arc::new(IdentityRegistry::new());
    let store = Arc::new(RwLock::new(MissionStore::new()));
    if let Some(missions_file) = &args.missions {
        let queued = store.write().await.load_missions_file(missions_file)?;
        info!("preloaded {} pending mission(s) from {:?}", queued, missions_file);
    }

    let end_point = EndPoint::bind(SocketAddr::new(args.bind, args.datagram_port), config).await?;
    let dispatcher = Dispatcher::new(end_point, registry.clone(), store.clone(), artifact_dir);

    let stream_server = StreamServer::bind(
        SocketAddr::new(args.bind, args.stream_port),
        telemetry_root.clone(),
        args.buffer_size,
    )
    .await?;

    let observation_state = Arc::new(ObservationState { registry, store, telemetry_root });
    let observation_addr = SocketAddr::new(args.bind, args.observation_port);

    info!("mother-ship up");
    select! {
        result = dispatcher.run() => result,
        result = stream_server.run() => result,
        result = observation::serve(observation_state, observation_addr) => result,
    }
}

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::DEBUG)
            .try_init()
            .ok();
    }
}
