use anyhow::{Context, Result};
use clap::Parser;
use meshgraph_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use meshgraph_core::{MeshNode, NodeConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "meshgraph")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run a mesh node until interrupted
    Run {
        /// Path to a TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Listen address for inbound peers, overrides the config file
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Peer to dial on startup; may be given multiple times. Replaces
        /// the peer list from the config file.
        #[arg(long = "peer")]
        peers: Vec<SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = LogLevel::from_str(&args.log_level).unwrap_or_else(|| {
        eprintln!("Invalid log level '{}', using 'info'", args.log_level);
        LogLevel::Info
    });
    init_logging_with_config(LogConfig::new(log_level).json_format(args.json_logs))?;

    match args.command {
        Some(Command::Run { config, listen, peers }) => run_node(config, listen, peers).await,
        None => {
            info!("No command specified. Use --help for usage information.");
            Ok(())
        }
    }
}

async fn run_node(
    config_path: Option<PathBuf>,
    listen: Option<SocketAddr>,
    peers: Vec<SocketAddr>,
) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => NodeConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => {
            let mut config = NodeConfig::default();
            config.fill_defaults();
            config
        }
    };
    if let Some(listen) = listen {
        config.network.listen_addr = Some(listen);
    }
    if !peers.is_empty() {
        config.network.peers = peers;
    }
    config.validate().context("invalid configuration")?;

    info!(node_id = %config.node.id, "starting meshgraph node");

    let mut node = MeshNode::new(config)?;
    if let Some(addr) = node.bind().await? {
        info!(%addr, "accepting peer connections");
    }
    let shutdown = node.shutdown_handle();

    let runner = tokio::spawn(node.run());
    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    shutdown.shutdown();
    runner.await??;
    info!("meshgraph node stopped");

    Ok(())
}
