use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Switchyard LLM gateway
#[derive(Debug, Parser)]
#[command(name = "switchyard", about = "Protocol-converting LLM gateway with credential failover")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "switchyard.toml", env = "SWITCHYARD_CONFIG")]
    pub config: PathBuf,

    /// Override the listen address
    #[arg(long, env = "SWITCHYARD_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Log filter directives, e.g. `info,switchyard_llm=debug`
    #[arg(long, default_value = "info", env = "SWITCHYARD_LOG")]
    pub log: String,
}
