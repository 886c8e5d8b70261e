//! Ouli - deterministic HTTP/WebSocket record-replay proxy for
//! end-to-end tests.

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use ouli::cli::Cli;
use ouli::engine::{Engine, Target};
use ouli::network::{self, server, ConnectionPool};

const MIN_PORT: u16 = 1025;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.port < MIN_PORT {
        error!("--port must be in range {MIN_PORT}-65535, got {}", cli.port);
        process::exit(1);
    }

    let targets: Vec<Target> = match cli.targets.iter().map(|t| Target::parse(t)).collect() {
        Ok(targets) => targets,
        Err(e) => {
            error!("invalid target: {e}");
            process::exit(1);
        }
    };

    let engine = Engine::new(cli.recordings_dir.clone(), targets);
    let pool = Arc::new(ConnectionPool::new(network::MAX_CONNECTIONS));
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));

    std::env::set_var("TEST_PROXY_RECORDER_PORT", cli.port.to_string());
    info!(
        "ouli starting: port={} recordings_dir={} targets={:?}",
        cli.port,
        cli.recordings_dir.display(),
        cli.targets
    );

    if let Err(e) = server::run(engine, addr, pool).await {
        error!("server exited with error: {e}");
        process::exit(1);
    }
}
