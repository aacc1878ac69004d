use crate::error::StreamError;
use crate::wire::{self, PREFIX_LEN};
use model::AgentId;
use serde_json::Value;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Accepts telemetry uploads and stores them under the configured root,
/// keyed by rover. One worker task per connection; a failing upload closes
/// that connection and nothing else.
pub struct StreamServer {
    listener: TcpListener,
    store_root: PathBuf,
    buffer_size: usize,
}

impl StreamServer {
    pub async fn bind(addr: SocketAddr, store_root: PathBuf, buffer_size: usize) -> anyhow::Result<StreamServer> {
        let listener = TcpListener::bind(addr).await?;
        tokio::fs::create_dir_all(&store_root).await?;
        info!("bound TelemetryStream server to {:?}", listener.local_addr()?);
        Ok(StreamServer { listener, store_root, buffer_size })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr().expect("listener should have an initialized local addr")
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    continue;
                }
            };
            debug!("telemetry connection from {:?}", peer);

            let store_root = self.store_root.clone();
            let buffer_size = self.buffer_size;
            tokio::spawn(async move {
                match handle_upload(stream, &store_root, buffer_size).await {
                    Ok(path) => info!("stored telemetry from {:?} at {:?}", peer, path),
                    Err(e) => warn!("telemetry upload from {:?} failed: {}", peer, e),
                }
            });
        }
    }
}

/// Drains one upload: length prefix, filename, file bytes until end of
/// stream. The file first lands at the storage root and is then sorted into
/// the per-rover directory if its content identifies one.
async fn handle_upload(mut stream: TcpStream, store_root: &Path, buffer_size: usize) -> Result<PathBuf, StreamError> {
    let mut prefix = [0u8; PREFIX_LEN];
    stream
        .read_exact(&mut prefix)
        .await
        .map_err(|_| StreamError::MalformedFrame("length prefix is not four bytes"))?;
    let name_len = wire::parse_prefix(&prefix)?;

    let mut name_buf = vec![0u8; name_len];
    stream
        .read_exact(&mut name_buf)
        .await
        .map_err(|_| StreamError::MalformedFrame("stream ended inside the filename"))?;
    let name = std::str::from_utf8(&name_buf)
        .map_err(|_| StreamError::MalformedFrame("filename is not valid UTF-8"))?
        .to_owned();
    wire::validate_file_name(&name)?;

    let path = store_root.join(&name);
    let mut file = tokio::fs::File::create(&path).await?;
    let mut buf = vec![0u8; buffer_size];
    loop {
        let num_read = stream.read(&mut buf).await?;
        if num_read == 0 {
            break;
        }
        file.write_all(&buf[..num_read]).await?;
    }
    file.flush().await?;
    drop(file);

    sort_into_rover_dir(store_root, &name, path).await
}

/// Moves a stored file to `<root>/<rover-id>/<name>` when it parses as JSON
/// carrying a usable `rover_id`; everything else stays at the root.
async fn sort_into_rover_dir(store_root: &Path, name: &str, path: PathBuf) -> Result<PathBuf, StreamError> {
    let content = tokio::fs::read(&path).await?;
    let rover_id = serde_json::from_slice::<Value>(&content)
        .ok()
        .and_then(|v| v.get("rover_id").and_then(|id| id.as_str().map(str::to_owned)));

    let Some(rover_id) = rover_id else {
        debug!("{} carries no rover_id, leaving it at the storage root", name);
        return Ok(path);
    };
    let Ok(rover_id) = AgentId::new(&rover_id) else {
        warn!("{} carries an unusable rover_id, leaving it at the storage root", name);
        return Ok(path);
    };

    let rover_dir = store_root.join(rover_id.as_str());
    tokio::fs::create_dir_all(&rover_dir).await?;
    let target = rover_dir.join(name);
    tokio::fs::rename(&path, &target).await?;
    Ok(target)
}
