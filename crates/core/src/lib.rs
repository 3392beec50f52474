//! Parley Core Library
//!
//! Connection-independent broker state: the peer registry, one-to-one
//! sessions, named rooms, and the shared `Broker` handle that serializes
//! access to them.

pub mod broker;
pub mod error;
pub mod invariants;
pub mod registry;
pub mod room;
pub mod session;

pub use broker::{Broker, Departure, Notice};
pub use error::{BrokerError, Result};
pub use registry::{validate_peer_id, Peer, PeerRegistry, PeerSender, PeerStatus};
pub use room::{validate_room_id, RoomDeparture, RoomTable};
pub use session::SessionTable;
