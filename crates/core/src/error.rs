//! Error types for Parley Core
//!
//! The `Display` text of each variant is what a peer sees after `ERROR: `.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("invalid peer id '{0}'")]
    InvalidPeerId(String),

    #[error("peer id '{0}' already in use")]
    AlreadyInUse(String),

    #[error("peer '{0}' not found")]
    PeerNotFound(String),

    #[error("peer '{0}' busy")]
    PeerBusy(String),

    #[error("cannot start a session with yourself")]
    SelfSession,

    #[error("you are already in a session or room")]
    AlreadyInSession,

    #[error("you are already in a room or session")]
    AlreadyInRoom,

    #[error("not in a session or room")]
    NotInSession,

    #[error("you are not in a room")]
    NotRoomMember,

    #[error("peer '{0}' is not in this room")]
    NotInRoom(String),

    #[error("invalid room id '{0}'")]
    InvalidRoomId(String),
}

pub type Result<T> = std::result::Result<T, BrokerError>;
