//! Signaling protocol
//!
//! Peers speak in short text commands. Anything that is not a command is
//! negotiation payload and is forwarded without being interpreted.

use std::fmt;

use parley_core::BrokerError;
use serde_json::Value;

/// WebSocket close code sent on protocol violations
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// WebSocket close code sent when the server shuts down
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// A text frame received from a peer, classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// `HELLO <id>`; the id is validated by the registry
    Hello(&'a str),
    /// `SESSION <calleeId>`
    Session(&'a str),
    /// `ROOM <roomId>`
    Room(&'a str),
    /// `ROOM_PEER_MSG <targetId> <payload>`
    RoomPeerMsg { to: &'a str, payload: &'a str },
    /// `LEAVE`
    Leave,
    /// A known command word without its required argument
    Incomplete(&'static str),
    /// Not a command: payload or garbage
    Other(&'a str),
}

impl<'a> Command<'a> {
    pub fn parse(text: &'a str) -> Self {
        let (word, rest) = match text.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (text, ""),
        };

        match word {
            "HELLO" => Command::Hello(rest),
            "SESSION" if rest.is_empty() => Command::Incomplete("SESSION"),
            "SESSION" => Command::Session(rest),
            "ROOM" if rest.is_empty() => Command::Incomplete("ROOM"),
            "ROOM" => Command::Room(rest),
            "ROOM_PEER_MSG" => match rest.split_once(char::is_whitespace) {
                Some((to, payload)) => Command::RoomPeerMsg {
                    to,
                    payload: payload.trim_start(),
                },
                None => Command::Incomplete("ROOM_PEER_MSG"),
            },
            "LEAVE" if rest.is_empty() => Command::Leave,
            _ => Command::Other(text),
        }
    }
}

/// Whether `text` is a JSON object carrying `sdp` or `ice`
pub fn is_negotiation_payload(text: &str) -> bool {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => map.contains_key("sdp") || map.contains_key("ice"),
        _ => false,
    }
}

/// A text frame the broker sends back to the requesting peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<'a> {
    Hello,
    LeaveOk,
    /// Targeted room message, tagged with its origin
    RoomPeerMsg { from: &'a str, payload: &'a str },
    Error(String),
}

impl Reply<'_> {
    pub fn error(reason: impl fmt::Display) -> Self {
        Reply::Error(reason.to_string())
    }

    pub fn unknown_command() -> Self {
        Reply::Error("Unknown command".into())
    }

    pub fn incomplete(command: &str) -> Self {
        Reply::Error(format!("{} requires an argument", command))
    }
}

impl From<BrokerError> for Reply<'_> {
    fn from(e: BrokerError) -> Self {
        Reply::error(e)
    }
}

impl fmt::Display for Reply<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Hello => write!(f, "HELLO"),
            Reply::LeaveOk => write!(f, "LEAVE_OK"),
            Reply::RoomPeerMsg { from, payload } => write!(f, "ROOM_PEER_MSG {} {}", from, payload),
            Reply::Error(reason) => write!(f, "ERROR: {}", reason),
        }
    }
}
