mod agent;
mod telemetry_task;

use agent::RoverAgent;
use clap::Parser;
use missionlink::{EndPoint, LinkConfig};
use model::AgentId;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use telemetry_task::TelemetrySender;
use tracing::{info, warn, Level};

/// A field unit: registers with the mother-ship, requests and executes
/// missions, reports progress and streams telemetry.
#[derive(Parser)]
struct Args {
    /// Mother-ship address
    mothership: IpAddr,

    /// This rover's identity (1-3 characters, e.g. r1)
    id: String,

    /// Address to bind the MissionLink endpoint on
    #[clap(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    #[clap(long, default_value_t = 8080)]
    datagram_port: u16,

    #[clap(long, default_value_t = 8081)]
    stream_port: u16,

    #[clap(long, default_value_t = 2)]
    receive_timeout_s: u64,

    #[clap(long, default_value_t = 5)]
    retry_limit: u32,

    #[clap(long, default_value_t = 1024)]
    buffer_size: usize,

    /// Seconds between telemetry uploads
    #[clap(long, default_value_t = 30)]
    telemetry_interval_s: u64,

    /// Seconds between mission requests while idle
    #[clap(long, default_value_t = 10)]
    request_interval_s: u64,

    #[clap(long, default_value = "rover-data")]
    data_dir: PathBuf,

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

    let id = AgentId::new(&args.id)?;
    let config = Arc::new(LinkConfig {
        datagram_port: args.datagram_port,
        receive_timeout: Duration::from_secs(args.receive_timeout_s),
        retry_limit: args.retry_limit,
        buffer_size: args.buffer_size,
    });
    config.validate()?;

    let end_point = EndPoint::bind(SocketAddr::new(args.bind, args.datagram_port), config).await?;
    let agent = RoverAgent::new(
        id.clone(),
        SocketAddr::new(args.mothership, args.datagram_port),
        end_point,
        args.data_dir.join("missions"),
    );

    agent.register().await?;

    let telemetry = TelemetrySender::new(
        id,
        SocketAddr::new(args.mothership, args.stream_port),
        args.data_dir.join("telemetry"),
        Duration::from_secs(args.telemetry_interval_s),
        args.buffer_size,
    );
    tokio::spawn(async move {
        if let Err(e) = telemetry.run().await {
            warn!("telemetry task stopped: {}", e);
        }
    });

    info!("rover {:?} on station", agent.id());
    loop {
        match agent.request_mission().await {
            Ok(Some(mission)) => agent.execute_mission(&mission).await,
            Ok(None) => {
                // nothing pending: keep an ear open for an unsolicited delivery
                match agent.await_delivery().await {
                    Ok(Some(mission)) => agent.execute_mission(&mission).await,
                    Ok(None) => {}
                    Err(e) => warn!("listener error: {}", e),
                }
            }
            Err(e) => warn!("mission request failed: {}", e),
        }
        tokio::time::sleep(Duration::from_secs(args.request_interval_s)).await;
    }
}
