//! Shared broker handle
//!
//! `Broker` owns the peer, session and room tables behind a single lock.
//! Each operation mutates the tables while holding it, collects the
//! outbound queues it needs, and sends only after the guard is dropped.
//! Two peers disconnecting at once therefore never wait on each other.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::OwnedPermit;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{BrokerError, Result};
use crate::invariants;
use crate::registry::{PeerRegistry, PeerSender, PeerStatus};
use crate::room::RoomTable;
use crate::session::SessionTable;

/// How long a notice may wait on a full queue before it is dropped
const NOTICE_TIMEOUT: Duration = Duration::from_secs(5);

/// Text the broker queues for a peer itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Acknowledges `SESSION`; queued before the partner can route
    SessionOk,
    /// Acknowledges `ROOM` with the members already present
    RoomOk(Vec<String>),
    PeerJoined(String),
    PeerLeft(String),
    SessionEnded,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::SessionOk => write!(f, "SESSION_OK"),
            Notice::RoomOk(members) if members.is_empty() => write!(f, "ROOM_OK"),
            Notice::RoomOk(members) => write!(f, "ROOM_OK {}", members.join(" ")),
            Notice::PeerJoined(id) => write!(f, "ROOM_PEER_JOINED {}", id),
            Notice::PeerLeft(id) => write!(f, "ROOM_PEER_LEFT {}", id),
            Notice::SessionEnded => write!(f, "ERROR: Session ended"),
        }
    }
}

/// What an explicit leave dissolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Departure {
    Session { partner: String },
    Room { room_id: String },
}

/// A notification waiting to be sent once the lock is released
struct Pending {
    to: String,
    tx: PeerSender,
    notice: Notice,
}

#[derive(Debug, Default)]
struct Tables {
    registry: PeerRegistry,
    sessions: SessionTable,
    rooms: RoomTable,
}

impl Tables {
    fn check(&self) {
        invariants::assert_session_invariants(&self.registry, &self.sessions);
        invariants::assert_room_invariants(&self.registry, &self.rooms);
    }

    fn pending(&self, ids: &[String], notice: &Notice) -> Vec<Pending> {
        ids.iter()
            .filter_map(|id| {
                self.registry.sender(id).map(|tx| Pending {
                    to: id.clone(),
                    tx,
                    notice: notice.clone(),
                })
            })
            .collect()
    }

    /// End `id`'s session and leave its room, collecting notifications
    fn dissolve(&mut self, id: &str) -> (Option<Departure>, Vec<Pending>) {
        if let Some(partner) = self.sessions.end(&mut self.registry, id) {
            let pending = self.pending(std::slice::from_ref(&partner), &Notice::SessionEnded);
            info!(peer_id = %id, partner = %partner, "Session ended");
            return (Some(Departure::Session { partner }), pending);
        }

        if let Some(departure) = self.rooms.leave(&mut self.registry, id) {
            let pending = self.pending(&departure.remaining, &Notice::PeerLeft(id.to_string()));
            info!(
                peer_id = %id,
                room_id = %departure.room_id,
                remaining = departure.remaining.len(),
                "Peer left room"
            );
            return (
                Some(Departure::Room {
                    room_id: departure.room_id,
                }),
                pending,
            );
        }

        (None, Vec::new())
    }
}

/// Handle to one broker instance; clones share the same tables
#[derive(Debug, Clone, Default)]
pub struct Broker {
    tables: Arc<RwLock<Tables>>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer as Idle
    pub async fn register(&self, id: &str, addr: SocketAddr, tx: PeerSender) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.registry.register(id, addr, tx)?;
        info!(peer_id = %id, addr = %addr, "Registered peer");
        Ok(())
    }

    /// Pair `caller` with `callee` and queue `SESSION_OK` for the caller.
    ///
    /// The acknowledgment is queued under the lock, so it precedes anything
    /// the partner routes back. The callee is not notified.
    pub async fn request_session(&self, caller: &str, callee: &str) -> Result<()> {
        let ack = self.reserve(caller).await?;

        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        tables
            .sessions
            .request(&mut tables.registry, caller, callee)?;
        tables.check();
        ack.send(Notice::SessionOk.to_string());

        info!(caller = %caller, callee = %callee, "Session started");
        Ok(())
    }

    /// Forward `message` unmodified to the session partner of `from`
    pub async fn route(&self, from: &str, message: String) -> Result<()> {
        let (partner, tx) = {
            let tables = self.tables.read().await;
            let partner = tables
                .sessions
                .partner(from)
                .ok_or(BrokerError::NotInSession)?;
            let tx = tables
                .registry
                .sender(partner)
                .ok_or(BrokerError::NotInSession)?;
            (partner.to_string(), tx)
        };

        debug!(from = %from, to = %partner, len = message.len(), "Routing session message");
        deliver(&partner, &tx, message).await;
        Ok(())
    }

    /// End the session `id` is in, notifying the partner.
    ///
    /// Returns the former partner; a no-op without a session.
    pub async fn end_session(&self, id: &str) -> Option<String> {
        let (partner, pending) = {
            let mut guard = self.tables.write().await;
            let tables = &mut *guard;
            let partner = tables.sessions.end(&mut tables.registry, id);
            tables.check();
            let pending = match &partner {
                Some(p) => tables.pending(std::slice::from_ref(p), &Notice::SessionEnded),
                None => Vec::new(),
            };
            (partner, pending)
        };

        notify_all(pending);
        partner
    }

    /// Join `room_id`, returning the members already present.
    ///
    /// `ROOM_OK` is queued for the joiner before the lock is released, so
    /// no room traffic can overtake it. Every existing member is told
    /// about the newcomer.
    pub async fn join_room(&self, id: &str, room_id: &str) -> Result<Vec<String>> {
        let ack = self.reserve(id).await?;

        let (existing, pending) = {
            let mut guard = self.tables.write().await;
            let tables = &mut *guard;
            let existing = tables.rooms.join(&mut tables.registry, id, room_id)?;
            tables.check();
            ack.send(Notice::RoomOk(existing.clone()).to_string());
            let pending = tables.pending(&existing, &Notice::PeerJoined(id.to_string()));
            (existing, pending)
        };

        info!(peer_id = %id, room_id = %room_id, members = existing.len() + 1, "Peer joined room");
        for p in pending {
            deliver(&p.to, &p.tx, p.notice.to_string()).await;
        }
        Ok(existing)
    }

    /// Forward `message` to one co-member, or to every other member
    pub async fn route_to_room(
        &self,
        from: &str,
        message: String,
        target: Option<&str>,
    ) -> Result<()> {
        let recipients: Vec<(String, PeerSender)> = {
            let tables = self.tables.read().await;
            tables
                .rooms
                .recipients(&tables.registry, from, target)?
                .into_iter()
                .filter_map(|id| tables.registry.sender(&id).map(|tx| (id, tx)))
                .collect()
        };

        debug!(from = %from, recipients = recipients.len(), "Routing room message");
        for (to, tx) in &recipients {
            deliver(to, tx, message.clone()).await;
        }
        Ok(())
    }

    /// Leave the current room, notifying the remaining members.
    ///
    /// Returns the room left; a no-op outside a room.
    pub async fn leave_room(&self, id: &str) -> Option<String> {
        let (room_id, pending) = {
            let mut guard = self.tables.write().await;
            let tables = &mut *guard;
            let departure = tables.rooms.leave(&mut tables.registry, id);
            tables.check();
            match departure {
                Some(d) => {
                    let pending = tables.pending(&d.remaining, &Notice::PeerLeft(id.to_string()));
                    (Some(d.room_id), pending)
                }
                None => (None, Vec::new()),
            }
        };

        notify_all(pending);
        room_id
    }

    /// Leave whatever session or room `id` is in
    pub async fn leave(&self, id: &str) -> Result<Departure> {
        let (departure, pending) = {
            let mut tables = self.tables.write().await;
            let result = tables.dissolve(id);
            tables.check();
            result
        };

        notify_all(pending);
        departure.ok_or(BrokerError::NotInSession)
    }

    /// Cleanup cascade for a terminated connection.
    ///
    /// Ends any session, leaves any room, and unregisters the peer.
    /// Notifications are best-effort. Calling this again is a no-op.
    pub async fn disconnect(&self, id: &str) {
        let (removed, pending) = {
            let mut tables = self.tables.write().await;
            let (_, pending) = tables.dissolve(id);
            let removed = tables.registry.remove(id).is_some();
            tables.check();
            (removed, pending)
        };

        notify_all(pending);
        if removed {
            info!(peer_id = %id, "Unregistered peer");
        }
    }

    /// Hold a slot in `id`'s own queue for an acknowledgment
    async fn reserve(&self, id: &str) -> Result<OwnedPermit<String>> {
        let tx = self
            .tables
            .read()
            .await
            .registry
            .sender(id)
            .ok_or_else(|| BrokerError::PeerNotFound(id.to_string()))?;
        tx.reserve_owned()
            .await
            .map_err(|_| BrokerError::PeerNotFound(id.to_string()))
    }

    pub async fn status(&self, id: &str) -> Option<PeerStatus> {
        self.tables.read().await.registry.status(id).cloned()
    }

    pub async fn partner(&self, id: &str) -> Option<String> {
        self.tables
            .read()
            .await
            .sessions
            .partner(id)
            .map(str::to_string)
    }

    pub async fn room_members(&self, room_id: &str) -> Vec<String> {
        self.tables.read().await.rooms.members(room_id).to_vec()
    }

    pub async fn peer_count(&self) -> usize {
        self.tables.read().await.registry.len()
    }

    pub async fn session_count(&self) -> usize {
        self.tables.read().await.sessions.len()
    }

    pub async fn room_count(&self) -> usize {
        self.tables.read().await.rooms.len()
    }
}

/// Queue a routed message, waiting for room in the peer's queue
async fn deliver(to: &str, tx: &PeerSender, message: String) {
    if tx.send(message).await.is_err() {
        debug!(peer_id = %to, "Failed to queue message for peer");
    }
}

/// Queue notifications without blocking the caller.
///
/// A full queue gets a detached send bounded by `NOTICE_TIMEOUT`; a closed
/// queue is skipped.
fn notify_all(pending: Vec<Pending>) {
    for Pending { to, tx, notice } in pending {
        match tx.try_send(notice.to_string()) {
            Ok(()) => {}
            Err(TrySendError::Full(text)) => {
                tokio::spawn(async move {
                    match tokio::time::timeout(NOTICE_TIMEOUT, tx.send(text)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) => debug!(peer_id = %to, "Peer gone before notification"),
                        Err(_) => warn!(peer_id = %to, "Dropped notification to stalled peer"),
                    }
                });
            }
            Err(TrySendError::Closed(_)) => {
                debug!(peer_id = %to, "Dropped notification to closed peer");
            }
        }
    }
}
