//! Show the resolved configuration.

use anyhow::Result;
use tether_client::TetherConfig;

pub fn cmd_config(config: &TetherConfig) -> Result<()> {
    println!("# {}", TetherConfig::file_path().display());
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
