//! LogHub Server - Binary Entry Point
//!
//! This is the main entry point for the loghub-server binary.

use std::process;

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use loghub::config::ServerConfig;
use loghub::server::Server;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            process::exit(1);
        }
    };

    let server = match Server::bind(config).await {
        Ok(server) => server,
        Err(err) => {
            error!(error = %err, "startup failed");
            process::exit(1);
        }
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stop signal received");
            let _ = stop_tx.send(true);
        }
    });

    server.run(stop_rx).await;
}
