//! Command-line arguments
//!
//! Flags override values from the config file, which override defaults.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use parley_net::ServerConfig;

/// Parley WebRTC signaling server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    pub addr: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Seconds of silence before a peer is pinged
    #[arg(long)]
    pub keepalive_timeout: Option<u64>,

    /// Health check path
    #[arg(long)]
    pub health: Option<String>,

    /// PEM certificate chain
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Serve plain WebSocket
    #[arg(long, conflicts_with = "enable_tls")]
    pub disable_tls: bool,

    /// Terminate TLS using --cert and --key
    #[arg(long)]
    pub enable_tls: bool,
}

impl Args {
    /// Resolve the effective server configuration
    pub fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if let Some(addr) = &self.addr {
            config.addr = addr.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secs) = self.keepalive_timeout {
            config.keepalive_timeout_secs = secs;
        }
        if let Some(path) = &self.health {
            config.health_path = path.clone();
        }
        if let Some(cert) = &self.cert {
            config.tls.cert_path = Some(cert.clone());
        }
        if let Some(key) = &self.key {
            config.tls.key_path = Some(key.clone());
        }
        if self.enable_tls {
            config.tls.enabled = true;
        }
        if self.disable_tls {
            config.tls.enabled = false;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}
