//! Signaling server
//!
//! Serves the health check on its configured path and accepts a WebSocket
//! upgrade on every other path. Each upgraded connection runs its own
//! control loop against the shared broker.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::connect_info::Connected;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::serve::IncomingStream;
use axum::Router;
use parley_core::Broker;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::connection::{handle_connection, ConnectionSettings};
use crate::error::{Error, Result};
use crate::tls::{self, TlsListener};

/// Remote address of an accepted connection, plain or TLS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

impl Connected<IncomingStream<'_, TcpListener>> for PeerAddr {
    fn connect_info(stream: IncomingStream<'_, TcpListener>) -> Self {
        PeerAddr(*stream.remote_addr())
    }
}

impl Connected<IncomingStream<'_, TlsListener>> for PeerAddr {
    fn connect_info(stream: IncomingStream<'_, TlsListener>) -> Self {
        PeerAddr(*stream.remote_addr())
    }
}

/// Shared state for request handlers
#[derive(Clone)]
struct AppState {
    broker: Broker,
    settings: Arc<ConnectionSettings>,
    max_message_size: usize,
    /// Flips to `true` once and stays there
    shutdown_tx: watch::Sender<bool>,
}

/// Running server handle
pub struct Server {
    addr: SocketAddr,
    broker: Broker,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<io::Result<()>>,
}

impl Server {
    /// Bind and start serving with the given broker
    pub async fn start(config: &ServerConfig, broker: Broker) -> Result<Self> {
        config.validate()?;

        // Load TLS material before binding so a bad path fails fast
        let tls_config = if config.tls.enabled {
            match (&config.tls.cert_path, &config.tls.key_path) {
                (Some(cert), Some(key)) => Some(tls::load_server_config(cert, key)?),
                _ => return Err(Error::Config("TLS certificate or key path missing".into())),
            }
        } else {
            None
        };

        let listener = TcpListener::bind((config.addr.as_str(), config.port)).await?;
        let bound_addr = listener.local_addr()?;

        let (shutdown_tx, _) = watch::channel(false);

        let app = router(config, broker.clone(), shutdown_tx.clone())
            .into_make_service_with_connect_info::<PeerAddr>();

        let mut shutdown_rx = shutdown_tx.subscribe();
        let signal = async move {
            let _ = shutdown_rx.wait_for(|stopping| *stopping).await;
        };

        let task = match tls_config {
            Some(tls_config) => {
                let listener = TlsListener::new(listener, tls_config)?;
                tokio::spawn(async move {
                    axum::serve(listener, app)
                        .with_graceful_shutdown(signal)
                        .await
                })
            }
            None => tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(signal)
                    .await
            }),
        };

        info!(
            addr = %bound_addr,
            tls = config.tls.enabled,
            health = %config.health_path,
            "Server started"
        );

        Ok(Server {
            addr: bound_addr,
            broker,
            shutdown_tx,
            task,
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Stop accepting and close every open connection
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        info!("Server shutdown initiated");
    }

    /// Wait for the server to stop
    pub async fn wait(self) -> Result<()> {
        match self.task.await {
            Ok(result) => Ok(result?),
            Err(e) => Err(Error::Io(io::Error::other(e))),
        }
    }
}

fn router(config: &ServerConfig, broker: Broker, shutdown_tx: watch::Sender<bool>) -> Router {
    let state = AppState {
        broker,
        settings: Arc::new(config.connection_settings()),
        max_message_size: config.max_message_size,
        shutdown_tx,
    };

    Router::new()
        .route(&config.health_path, get(health))
        .fallback(upgrade)
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(PeerAddr(addr)): ConnectInfo<PeerAddr>,
    State(state): State<AppState>,
) -> Response {
    // Late arrivals would miss the close sent to everyone else
    if *state.shutdown_tx.borrow() {
        debug!(addr = %addr, "Refusing upgrade during shutdown");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    debug!(addr = %addr, "WebSocket upgrade");
    let shutdown_rx = state.shutdown_tx.subscribe();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| {
            handle_connection(socket, addr, state.broker, state.settings, shutdown_rx)
        })
}
