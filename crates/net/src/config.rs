//! Server configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::ConnectionSettings;
use crate::error::{Error, Result};
use crate::DEFAULT_PORT;

/// Configuration for the signaling server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind (default `"0.0.0.0"`)
    pub addr: String,
    /// Port to bind; `0` picks an ephemeral port
    pub port: u16,
    /// Silence in seconds before a peer is pinged
    pub keepalive_timeout_secs: u64,
    /// Seconds a new connection has to send HELLO
    pub handshake_timeout_secs: u64,
    /// Path answered by the health check
    pub health_path: String,
    /// Max inbound WebSocket message size in bytes
    pub max_message_size: usize,
    /// Per-peer outbound queue capacity
    pub outbound_queue: usize,
    pub tls: TlsConfig,
}

/// TLS termination settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    /// PEM certificate chain
    pub cert_path: Option<PathBuf>,
    /// PEM private key
    pub key_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            keepalive_timeout_secs: 30,
            handshake_timeout_secs: 5,
            health_path: "/health".into(),
            max_message_size: 1024 * 1024,
            outbound_queue: 64,
            tls: TlsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse a TOML document; missing fields take their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Check the settings are usable before binding
    pub fn validate(&self) -> Result<()> {
        if !self.health_path.starts_with('/') {
            return Err(Error::Config(format!(
                "health path '{}' must start with '/'",
                self.health_path
            )));
        }
        if self.keepalive_timeout_secs == 0 {
            return Err(Error::Config("keepalive timeout must be non-zero".into()));
        }
        if self.handshake_timeout_secs == 0 {
            return Err(Error::Config("handshake timeout must be non-zero".into()));
        }
        if self.outbound_queue == 0 {
            return Err(Error::Config("outbound queue must be non-zero".into()));
        }
        if self.tls.enabled && (self.tls.cert_path.is_none() || self.tls.key_path.is_none()) {
            return Err(Error::Config(
                "TLS enabled but certificate or key path missing".into(),
            ));
        }
        Ok(())
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            keepalive_timeout: Duration::from_secs(self.keepalive_timeout_secs),
            outbound_queue: self.outbound_queue,
        }
    }
}
