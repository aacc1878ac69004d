use crate::error::StreamError;
use crate::wire;
use std::net::SocketAddr;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Uploads one file. Every call opens a fresh connection - the wire format
/// frames exactly one file per connection, and periodic senders are expected
/// to call this once per interval.
pub async fn send_file(server: SocketAddr, path: &Path, buffer_size: usize) -> Result<(), StreamError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or(StreamError::MalformedFrame("path has no usable file name"))?;
    wire::validate_file_name(name)?;

    let mut stream = TcpStream::connect(server).await?;
    stream.write_all(&wire::encode_prefix(name.len())).await?;
    stream.write_all(name.as_bytes()).await?;

    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; buffer_size];
    loop {
        let num_read = file.read(&mut buf).await?;
        if num_read == 0 {
            break;
        }
        stream.write_all(&buf[..num_read]).await?;
    }
    stream.shutdown().await?;
    debug!("uploaded {} to {:?}", name, server);
    Ok(())
}
