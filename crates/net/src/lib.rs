//! Parley Network Library
//!
//! WebSocket transport for the signaling broker.
//!
//! # Architecture
//!
//! - **Server**: HTTP listener with a health endpoint; every other path
//!   upgrades to a WebSocket
//! - **Connection**: One task per peer running handshake, dispatch and cleanup
//! - **Liveness**: Quiet peers are pinged, never dropped for silence
//! - **Protocol**: Short text commands; everything else is opaque payload
//!
//! # Usage
//!
//! ```ignore
//! let config = ServerConfig::load("parley.toml")?;
//! let server = Server::start(&config, Broker::new()).await?;
//!
//! tokio::signal::ctrl_c().await?;
//! server.shutdown();
//! server.wait().await?;
//! ```

pub mod config;
pub mod connection;
pub mod error;
mod liveness;
pub mod protocol;
pub mod server;
pub mod tls;

pub use config::{ServerConfig, TlsConfig};
pub use connection::ConnectionSettings;
pub use error::{Error, Result};
pub use protocol::{Command, Reply};
pub use server::{PeerAddr, Server};

/// Default port for Parley servers
pub const DEFAULT_PORT: u16 = 8443;
