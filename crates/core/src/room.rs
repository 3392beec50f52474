//! Named multi-party rooms
//!
//! A room is created by its first joiner and dropped as soon as the last
//! member leaves. Members are kept in join order.

use std::collections::HashMap;

use crate::error::{BrokerError, Result};
use crate::registry::{PeerRegistry, PeerStatus};

/// Check that a room id is non-empty and free of whitespace
pub fn validate_room_id(room_id: &str) -> Result<()> {
    if room_id.is_empty() || room_id.chars().any(char::is_whitespace) {
        return Err(BrokerError::InvalidRoomId(room_id.to_string()));
    }
    Ok(())
}

/// Result of a peer leaving its room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomDeparture {
    pub room_id: String,
    /// Members still in the room, to be told about the departure
    pub remaining: Vec<String>,
}

/// Room membership table
#[derive(Debug, Default)]
pub struct RoomTable {
    rooms: HashMap<String, Vec<String>>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an idle peer to `room_id`, creating the room if needed.
    ///
    /// Returns the members that were already there.
    pub fn join(
        &mut self,
        registry: &mut PeerRegistry,
        id: &str,
        room_id: &str,
    ) -> Result<Vec<String>> {
        validate_room_id(room_id)?;

        if !registry.lookup(id)?.status.is_idle() {
            return Err(BrokerError::AlreadyInRoom);
        }

        let members = self.rooms.entry(room_id.to_string()).or_default();
        let existing = members.clone();
        members.push(id.to_string());

        registry.set_status(id, PeerStatus::InRoom(room_id.to_string()));
        Ok(existing)
    }

    /// Remove a peer from its room and return it to Idle.
    ///
    /// Returns `None` if the peer was not in a room.
    pub fn leave(&mut self, registry: &mut PeerRegistry, id: &str) -> Option<RoomDeparture> {
        let room_id = match registry.status(id)? {
            PeerStatus::InRoom(room_id) => room_id.clone(),
            _ => return None,
        };

        let remaining = match self.rooms.get_mut(&room_id) {
            Some(members) => {
                members.retain(|m| m != id);
                members.clone()
            }
            None => Vec::new(),
        };
        if remaining.is_empty() {
            self.rooms.remove(&room_id);
        }

        registry.set_status(id, PeerStatus::Idle);
        Some(RoomDeparture { room_id, remaining })
    }

    /// Resolve who a room message from `from` goes to.
    ///
    /// With a target, only that co-member; otherwise every other member.
    pub fn recipients(
        &self,
        registry: &PeerRegistry,
        from: &str,
        target: Option<&str>,
    ) -> Result<Vec<String>> {
        let room_id = match registry.status(from) {
            Some(PeerStatus::InRoom(room_id)) => room_id,
            _ => return Err(BrokerError::NotRoomMember),
        };
        let members = self.members(room_id);

        match target {
            Some(target) => {
                if target == from || !members.iter().any(|m| m == target) {
                    return Err(BrokerError::NotInRoom(target.to_string()));
                }
                Ok(vec![target.to_string()])
            }
            None => Ok(members.iter().filter(|m| *m != from).cloned().collect()),
        }
    }

    /// Members of a room in join order; empty if the room does not exist
    pub fn members(&self, room_id: &str) -> &[String] {
        self.rooms.get(room_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn rooms(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.rooms.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of non-empty rooms
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::{addr, sender};

    fn registry_with(ids: &[&str]) -> PeerRegistry {
        let mut registry = PeerRegistry::new();
        for id in ids {
            registry.register(id, addr(), sender()).unwrap();
        }
        registry
    }

    #[test]
    fn test_first_join_creates_room() {
        let mut registry = registry_with(&["alice"]);
        let mut rooms = RoomTable::new();

        let existing = rooms.join(&mut registry, "alice", "r1").unwrap();
        assert!(existing.is_empty());
        assert_eq!(rooms.members("r1"), ["alice"]);
        assert_eq!(
            registry.status("alice"),
            Some(&PeerStatus::InRoom("r1".into()))
        );
    }

    #[test]
    fn test_join_returns_existing_members_in_order() {
        let mut registry = registry_with(&["alice", "bob", "carol"]);
        let mut rooms = RoomTable::new();

        rooms.join(&mut registry, "alice", "r1").unwrap();
        rooms.join(&mut registry, "bob", "r1").unwrap();
        let existing = rooms.join(&mut registry, "carol", "r1").unwrap();

        assert_eq!(existing, vec!["alice".to_string(), "bob".to_string()]);
        assert_eq!(rooms.members("r1").len(), 3);
    }

    #[test]
    fn test_join_requires_idle() {
        let mut registry = registry_with(&["alice", "bob"]);
        let mut rooms = RoomTable::new();
        rooms.join(&mut registry, "alice", "r1").unwrap();

        assert_eq!(
            rooms.join(&mut registry, "alice", "r2").unwrap_err(),
            BrokerError::AlreadyInRoom
        );
        assert!(rooms.members("r2").is_empty());

        registry.set_status("bob", PeerStatus::InSession);
        assert_eq!(
            rooms.join(&mut registry, "bob", "r1").unwrap_err(),
            BrokerError::AlreadyInRoom
        );
        assert_eq!(rooms.members("r1"), ["alice"]);
    }

    #[test]
    fn test_invalid_room_id() {
        let mut registry = registry_with(&["alice"]);
        let mut rooms = RoomTable::new();

        assert!(matches!(
            rooms.join(&mut registry, "alice", "a room"),
            Err(BrokerError::InvalidRoomId(_))
        ));
        assert!(matches!(
            rooms.join(&mut registry, "alice", ""),
            Err(BrokerError::InvalidRoomId(_))
        ));
    }

    #[test]
    fn test_leave_shrinks_room() {
        let mut registry = registry_with(&["alice", "bob", "carol"]);
        let mut rooms = RoomTable::new();
        for id in ["alice", "bob", "carol"] {
            rooms.join(&mut registry, id, "r1").unwrap();
        }

        let departure = rooms.leave(&mut registry, "bob").unwrap();
        assert_eq!(departure.room_id, "r1");
        assert_eq!(
            departure.remaining,
            vec!["alice".to_string(), "carol".to_string()]
        );
        assert_eq!(rooms.members("r1").len(), 2);
        assert_eq!(registry.status("bob"), Some(&PeerStatus::Idle));

        // Not in a room any more
        assert!(rooms.leave(&mut registry, "bob").is_none());
    }

    #[test]
    fn test_last_leave_drops_room() {
        let mut registry = registry_with(&["alice"]);
        let mut rooms = RoomTable::new();
        rooms.join(&mut registry, "alice", "r1").unwrap();

        let departure = rooms.leave(&mut registry, "alice").unwrap();
        assert!(departure.remaining.is_empty());
        assert!(rooms.is_empty());
    }

    #[test]
    fn test_recipients_broadcast_excludes_sender() {
        let mut registry = registry_with(&["alice", "bob", "carol"]);
        let mut rooms = RoomTable::new();
        for id in ["alice", "bob", "carol"] {
            rooms.join(&mut registry, id, "r1").unwrap();
        }

        let to = rooms.recipients(&registry, "bob", None).unwrap();
        assert_eq!(to, vec!["alice".to_string(), "carol".to_string()]);
    }

    #[test]
    fn test_recipients_target_must_be_co_member() {
        let mut registry = registry_with(&["alice", "bob", "dave"]);
        let mut rooms = RoomTable::new();
        rooms.join(&mut registry, "alice", "r1").unwrap();
        rooms.join(&mut registry, "bob", "r1").unwrap();
        rooms.join(&mut registry, "dave", "r2").unwrap();

        assert_eq!(
            rooms.recipients(&registry, "alice", Some("bob")).unwrap(),
            vec!["bob".to_string()]
        );
        assert_eq!(
            rooms.recipients(&registry, "alice", Some("dave")).unwrap_err(),
            BrokerError::NotInRoom("dave".into())
        );
        assert_eq!(
            rooms.recipients(&registry, "alice", Some("alice")).unwrap_err(),
            BrokerError::NotInRoom("alice".into())
        );
    }

    #[test]
    fn test_recipients_outside_room() {
        let registry = registry_with(&["alice"]);
        let rooms = RoomTable::new();

        assert_eq!(
            rooms.recipients(&registry, "alice", None).unwrap_err(),
            BrokerError::NotRoomMember
        );
    }

    #[test]
    fn test_recipients_from_session_peer() {
        let mut registry = registry_with(&["alice", "bob"]);
        registry.set_status("alice", PeerStatus::InSession);
        let rooms = RoomTable::new();

        let err = rooms.recipients(&registry, "alice", Some("bob")).unwrap_err();
        assert_eq!(err, BrokerError::NotRoomMember);
        assert_eq!(err.to_string(), "you are not in a room");
    }
}
