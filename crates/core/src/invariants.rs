//! Developer guardrails and invariants
//!
//! Debug assertions over the broker tables, checked after every mutation.
//! These checks are compiled out in release builds.

use crate::registry::{PeerRegistry, PeerStatus};
use crate::room::RoomTable;
use crate::session::SessionTable;

/// Validate that pairings are symmetric and match peer status
pub fn assert_session_invariants(registry: &PeerRegistry, sessions: &SessionTable) {
    for (a, b) in sessions.pairs() {
        debug_assert!(a != b, "Peer {} is paired with itself", a);

        debug_assert!(
            sessions.partner(b) == Some(a),
            "Pairing {} -> {} has no reverse entry",
            a,
            b
        );

        debug_assert!(
            registry.status(a) == Some(&PeerStatus::InSession),
            "Peer {} is paired but has status {:?}",
            a,
            registry.status(a)
        );
    }

    for peer in registry.peers() {
        if peer.status == PeerStatus::InSession {
            debug_assert!(
                sessions.partner(&peer.id).is_some(),
                "Peer {} is InSession without a partner",
                peer.id
            );
        }
    }
}

/// Validate that room membership matches peer status
pub fn assert_room_invariants(registry: &PeerRegistry, rooms: &RoomTable) {
    for (room_id, members) in rooms.rooms() {
        // Empty rooms are dropped eagerly
        debug_assert!(!members.is_empty(), "Room {} is empty", room_id);

        for member in members {
            debug_assert!(
                registry.status(member) == Some(&PeerStatus::InRoom(room_id.to_string())),
                "Room {} lists {} with status {:?}",
                room_id,
                member,
                registry.status(member)
            );
        }
    }

    for peer in registry.peers() {
        if let PeerStatus::InRoom(room_id) = &peer.status {
            debug_assert!(
                rooms.members(room_id).contains(&peer.id),
                "Peer {} claims room {} but is not a member",
                peer.id,
                room_id
            );
        }
    }
}
