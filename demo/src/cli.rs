//! Command line arguments

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Active messages over TCP: echo server and ping/pong client
#[derive(Parser, Debug)]
#[command(name = "amtcp-demo", version, about)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,

    /// Iface configuration file (.toml, .yaml or .json)
    #[arg(long, short = 'c', global = true, env = "AMTCP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "pretty")]
    pub log_format: LogFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Echo every message back to its sender
    Server(ServerArgs),

    /// Send pings and wait for each pong
    Client(ClientArgs),
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Address to listen on
    #[arg(long, short = 'b', default_value = "127.0.0.1:13337")]
    pub bind: SocketAddr,
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Server address
    #[arg(long, short = 's', default_value = "127.0.0.1:13337")]
    pub server: SocketAddr,

    /// Number of round trips
    #[arg(long, short = 'n', default_value_t = 1000)]
    pub count: usize,

    /// Payload size in bytes
    #[arg(long, default_value_t = 64)]
    pub size: usize,

    /// Print the final metrics snapshot as JSON on stdout
    #[arg(long)]
    pub metrics: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable
    Pretty,
    /// One JSON object per line
    Json,
}
