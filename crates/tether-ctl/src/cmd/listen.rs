//! Print everything the peer sends until interrupted or disconnected.

use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;

use tether_client::TetherConfig;

use super::{link, messages::print_json};

pub async fn cmd_listen(config: &TetherConfig) -> Result<()> {
    let transport = link::open(config).await?;
    let mut inbound = transport.subscribe();
    let mut errors = transport.errors();
    let mut status = transport.status();
    let mut state = transport.queue_state();

    println!("Listening on {} (Ctrl-C to stop)", config.connection.addr);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            msg = inbound.recv() => match msg {
                Ok(text) => print_json(&text),
                Err(RecvError::Lagged(n)) => eprintln!("(skipped {n} messages)"),
                Err(RecvError::Closed) => break,
            },

            err = errors.recv() => {
                if let Ok(err) = err {
                    eprintln!("peer error: {}{}", err.error, err.details.map(|d| format!(" ({d})")).unwrap_or_default());
                }
            }

            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if let Some(s) = current {
                    let kind: String = s.status.into();
                    eprintln!("status: {kind}{}", s.details.map(|d| format!(" ({d})")).unwrap_or_default());
                }
            }

            changed = state.changed() => {
                if changed.is_err() || !state.borrow_and_update().open {
                    println!("Connection closed.");
                    break;
                }
            }
        }
    }
    transport.close().await;
    Ok(())
}
