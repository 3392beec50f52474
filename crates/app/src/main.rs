//! Parley - WebRTC signaling server
//!
//! Lets peers find each other by id and exchange session descriptions and
//! ICE candidates, one-to-one or in rooms. Media never passes through here.

use anyhow::Context;
use clap::Parser;
use parley_core::Broker;
use parley_net::Server;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = cli::Args::parse();
    let config = args.server_config()?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Parley");

    let server = Server::start(&config, Broker::new())
        .await
        .with_context(|| format!("Failed to start server on {}:{}", config.addr, config.port))?;

    shutdown_signal().await;

    server.shutdown();
    server.wait().await.context("Server failed")?;

    tracing::info!("Parley stopped");
    Ok(())
}

/// Wait for Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
