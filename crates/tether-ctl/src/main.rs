//! tether-ctl: send JSON messages to a peer over a tether transport.

mod cmd;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tether_client::TetherConfig;

use cmd::config::cmd_config;
use cmd::listen::cmd_listen;
use cmd::messages::{cmd_request, cmd_send};

fn print_usage() {
    println!("Usage: tether-ctl [--addr <host:port>] <command>");
    println!();
    println!("Commands:");
    println!("  send <file>                      Send a JSON file, wait for the peer to take it");
    println!("  request <file> [--timeout <ms>]  Send a JSON object and print the matching response");
    println!("  listen                           Print messages, statuses, and errors from the peer");
    println!("  config                           Show the resolved configuration");
    println!();
    println!("Options:");
    println!("  --addr <host:port>   Peer address (default: from config, 127.0.0.1:27950)");
    println!();
    println!("Logging is controlled by RUST_LOG, e.g. RUST_LOG=tether_client=debug");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut config = TetherConfig::load().context("failed to load config")?;
    let mut timeout = None;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" => {
                i += 1;
                config.connection.addr = args.get(i).context("--addr requires a value")?.clone();
            }
            "--timeout" => {
                i += 1;
                let ms: u64 = args
                    .get(i)
                    .context("--timeout requires a value")?
                    .parse()
                    .context("--timeout must be a number of milliseconds")?;
                timeout = Some(Duration::from_millis(ms));
            }
            other => remaining.push(other),
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["send", file]                 => cmd_send(&config, &PathBuf::from(file)).await,
        ["request", file]              => cmd_request(&config, &PathBuf::from(file), timeout).await,
        ["listen"]                     => cmd_listen(&config).await,
        ["config"]                     => cmd_config(&config),
        ["help"] | ["--help"] | ["-h"] | [] => { print_usage(); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
