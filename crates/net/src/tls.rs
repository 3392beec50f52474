//! TLS termination
//!
//! Certificates and keys are read from PEM files. Handshakes run on their
//! own tasks so a stalled client cannot hold up the accept loop; only
//! completed streams are handed to the HTTP server.

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Upper bound on a single TLS handshake
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Completed handshakes waiting for the server
const READY_QUEUE: usize = 64;

/// Build a rustls server config from PEM certificate chain and key files
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Result<rustls::ServerConfig> {
    let cert_pem = std::fs::read(cert_path)
        .map_err(|e| Error::Tls(format!("read cert '{}': {}", cert_path.display(), e)))?;
    let key_pem = std::fs::read(key_path)
        .map_err(|e| Error::Tls(format!("read key '{}': {}", key_path.display(), e)))?;

    let certs = parse_certs(&cert_pem)?;
    let key = parse_private_key(&key_pem)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(format!("protocol versions: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Tls(format!("build server config: {}", e)))?;

    // WebSocket upgrades ride on HTTP/1.1
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    info!(cert = %cert_path.display(), key = %key_path.display(), "TLS configured");
    Ok(config)
}

fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = pem;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("parse certs: {}", e)))?;

    if certs.is_empty() {
        return Err(Error::Tls("certificate chain empty".into()));
    }
    Ok(certs)
}

/// Accepts PKCS#8, PKCS#1 and SEC1 keys
fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut reader = pem;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::Tls(format!("parse key: {}", e)))?
        .ok_or_else(|| Error::Tls("no private key found".into()))
}

/// TCP listener that yields TLS-wrapped streams
pub struct TlsListener {
    local_addr: SocketAddr,
    ready: mpsc::Receiver<(TlsStream<TcpStream>, SocketAddr)>,
    accept_task: JoinHandle<()>,
}

impl TlsListener {
    pub fn new(listener: TcpListener, config: rustls::ServerConfig) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        let acceptor = TlsAcceptor::from(Arc::new(config));
        let (tx, ready) = mpsc::channel(READY_QUEUE);
        let accept_task = tokio::spawn(accept_loop(listener, acceptor, tx));

        Ok(Self {
            local_addr,
            ready,
            accept_task,
        })
    }
}

impl Drop for TlsListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl axum::serve::Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.ready.recv().await {
            Some(conn) => conn,
            // Accept loop is gone; never yield another connection
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    ready: mpsc::Sender<(TlsStream<TcpStream>, SocketAddr)>,
) {
    while !ready.is_closed() {
        let (stream, addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let ready = ready.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                Ok(Ok(tls)) => {
                    let _ = ready.send((tls, addr)).await;
                }
                Ok(Err(e)) => debug!(addr = %addr, error = %e, "TLS handshake failed"),
                Err(_) => debug!(addr = %addr, "TLS handshake timed out"),
            }
        });
    }
}
