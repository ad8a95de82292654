//! Sending commands.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tether_client::TetherConfig;

use super::link;

/// Fire-and-forget, then wait until the peer has answered and the queue
/// has drained. Replies are printed as they were received.
pub async fn cmd_send(config: &TetherConfig, file: &Path) -> Result<()> {
    let payload = link::read_payload(file)?;
    let transport = link::open(config).await?;
    let mut inbound = transport.subscribe();
    let mut state = transport.queue_state();

    transport.send(payload)?;
    tokio::time::timeout(
        transport.default_timeout(),
        state.wait_for(|s| !s.in_flight && s.queued == 0),
    )
    .await
    .context("timed out waiting for the peer to acknowledge")?
    .context("transport stopped")?;

    println!("Message sent.");
    while let Ok(reply) = inbound.try_recv() {
        print_json(&reply);
    }
    transport.close().await;
    Ok(())
}

/// Send a correlated request and print the matching response.
pub async fn cmd_request(config: &TetherConfig, file: &Path, timeout: Option<Duration>) -> Result<()> {
    let payload = link::read_payload(file)?;
    let transport = link::open(config).await?;
    let timeout = timeout.unwrap_or_else(|| transport.default_timeout());

    let result = transport.send_and_await(&payload, timeout).await;
    transport.close().await;
    match result {
        Ok(response) => {
            print_json(&response);
            Ok(())
        }
        Err(e) => bail!("request failed: {e}"),
    }
}

pub fn print_json(text: &str) {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{text}"),
        },
        Err(_) => println!("{text}"),
    }
}
