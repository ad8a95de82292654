//! Shared setup: read a payload file and open a transport to the peer.

use std::path::Path;

use anyhow::{Context, Result};
use tether_client::{TcpLineConnection, TetherConfig, Transport};

/// Read a JSON payload and re-serialize it onto a single line.
pub fn read_payload(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    Ok(value.to_string())
}

pub async fn open(config: &TetherConfig) -> Result<Transport> {
    let addr = config.connection.addr.as_str();
    let (conn, events) = TcpLineConnection::connect(addr)
        .await
        .with_context(|| format!("failed to connect to peer at {}, is it running?", addr))?;
    let transport = Transport::spawn(conn, events, config.transport.clone())?;
    Ok(transport)
}
