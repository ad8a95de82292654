//! CLI command modules.

pub mod config;
pub mod link;
pub mod listen;
pub mod messages;
