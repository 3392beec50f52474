//! Peer registry - who is connected and what they are doing
//!
//! The registry maps a peer id to the outbound queue of its connection,
//! its remote address, and its participation status. Status changes are
//! made by the session and room tables; nothing here looks at payloads.

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::error::{BrokerError, Result};

/// Outbound text queue of a peer's connection
pub type PeerSender = mpsc::Sender<String>;

/// Participation status of a registered peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerStatus {
    Idle,
    InSession,
    InRoom(String),
}

impl PeerStatus {
    pub fn is_idle(&self) -> bool {
        matches!(self, PeerStatus::Idle)
    }
}

/// A registered peer
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: String,
    /// Remote address, informational only
    pub addr: SocketAddr,
    pub status: PeerStatus,
    tx: PeerSender,
}

impl Peer {
    /// Outbound queue owned by this peer's connection
    pub fn sender(&self) -> &PeerSender {
        &self.tx
    }
}

/// Check that an id is non-empty and free of whitespace
pub fn validate_peer_id(id: &str) -> Result<()> {
    if id.is_empty() || id.chars().any(char::is_whitespace) {
        return Err(BrokerError::InvalidPeerId(id.to_string()));
    }
    Ok(())
}

/// Table of registered peers
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<String, Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new peer as Idle
    pub fn register(&mut self, id: &str, addr: SocketAddr, tx: PeerSender) -> Result<()> {
        validate_peer_id(id)?;

        if self.peers.contains_key(id) {
            return Err(BrokerError::AlreadyInUse(id.to_string()));
        }

        self.peers.insert(
            id.to_string(),
            Peer {
                id: id.to_string(),
                addr,
                status: PeerStatus::Idle,
                tx,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, id: &str) -> Result<&Peer> {
        self.peers
            .get(id)
            .ok_or_else(|| BrokerError::PeerNotFound(id.to_string()))
    }

    pub fn status(&self, id: &str) -> Option<&PeerStatus> {
        self.peers.get(id).map(|p| &p.status)
    }

    /// Set a peer's status. Unknown ids are ignored.
    ///
    /// Callers are responsible for the session/room invariants.
    pub fn set_status(&mut self, id: &str, status: PeerStatus) {
        if let Some(peer) = self.peers.get_mut(id) {
            peer.status = status;
        }
    }

    /// Remove a peer. Removing an unknown id is a no-op.
    pub fn remove(&mut self, id: &str) -> Option<Peer> {
        self.peers.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    /// Clone the outbound queue of a peer, if registered
    pub fn sender(&self, id: &str) -> Option<PeerSender> {
        self.peers.get(id).map(|p| p.tx.clone())
    }

    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
