//! Pushes a sealed bill to a remote collector over TCP.
//!
//! Frame: 4-byte big-endian payload length, then `<file name>\n<file bytes>`.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::info;
use tokio::{io::AsyncWriteExt, net::TcpStream};

pub fn encode_frame(file_name: &str, contents: &[u8]) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(file_name.len() + 1 + contents.len());
    payload.extend_from_slice(file_name.as_bytes());
    payload.push(b'\n');
    payload.extend_from_slice(contents);

    let len = u32::try_from(payload.len())
        .map_err(|_| anyhow!("bill payload of {} bytes is too large", payload.len()))?;

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub async fn send_bill(host: &str, port: u16, path: &Path) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("bill path {} has no file name", path.display()))?;
    let contents = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read bill {}", path.display()))?;
    let frame = encode_frame(file_name, &contents)?;

    let mut stream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("failed to connect to {host}:{port}"))?;
    stream.write_all(&frame).await.context("failed to send bill")?;
    stream.shutdown().await.context("failed to close bill transfer")?;

    info!("Sent {} ({} bytes) to {host}:{port}", file_name, contents.len());
    Ok(())
}
