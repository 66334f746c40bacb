//! Coordination node binary
//!
//! Configuration comes from the environment (`NODE_ID`, `NODE_HOST`,
//! `HTTP_PORT`, `REDIS_HOST`, `REDIS_PORT`, `PEERS`) with CLI overrides.

use clap::Parser;
use quorum_config::NodeConfig;
use quorum_server::CoordinationServer;
use std::process;
use tracing::error;

#[derive(Parser)]
#[command(name = "quorum-server")]
#[command(about = "Replicated distributed coordination node")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Node identity within the cluster
    #[arg(long)]
    node_id: Option<String>,

    /// Bind host
    #[arg(long)]
    host: Option<String>,

    /// Bind port
    #[arg(short, long)]
    port: Option<u16>,

    /// Queue store host
    #[arg(long)]
    redis_host: Option<String>,

    /// Queue store port
    #[arg(long)]
    redis_port: Option<u16>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = NodeConfig::from_env();
    if let Some(node_id) = cli.node_id {
        config.peers.remove(&node_id);
        config.node_id = node_id;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(redis_host) = cli.redis_host {
        config.redis_host = redis_host;
    }
    if let Some(redis_port) = cli.redis_port {
        config.redis_port = redis_port;
    }
    if let Some(log_level) = cli.log_level {
        config.log_level = log_level;
    }

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        process::exit(1);
    }

    let server = match CoordinationServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Failed to initialize server: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = server.start().await {
        error!("Server error: {e}");
        process::exit(1);
    }
}
