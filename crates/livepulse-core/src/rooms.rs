//! Cache of rooms this session has joined.
//!
//! Membership here reflects what the session has asked to join; the
//! authoritative room directory lives on the server. Descriptors are cached
//! as the server reports them.

use std::collections::{HashMap, HashSet};

use livepulse_proto::Room;

/// Joined-room set plus last-known descriptors.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    joined: HashSet<String>,
    descriptors: HashMap<String, Room>,
}

impl RoomRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a room to the membership set.
    ///
    /// Idempotent: returns `false` if already joined.
    pub fn join(&mut self, room_id: impl Into<String>) -> bool {
        self.joined.insert(room_id.into())
    }

    /// Remove a room from the membership set.
    ///
    /// Idempotent: returns `false` if not joined. The cached descriptor is
    /// dropped with the membership.
    pub fn leave(&mut self, room_id: &str) -> bool {
        self.descriptors.remove(room_id);
        self.joined.remove(room_id)
    }

    /// Whether the session currently considers itself in the room.
    #[must_use]
    pub fn is_joined(&self, room_id: &str) -> bool {
        self.joined.contains(room_id)
    }

    /// Current membership, sorted, for rejoin-after-reconnect.
    ///
    /// Every room in the snapshot must be rejoined before queued traffic for
    /// the session counts as delivered.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.joined.iter().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Record a server-reported descriptor for a joined room.
    ///
    /// Ignored for rooms the session has not joined.
    pub fn update_descriptor(&mut self, room: Room) {
        if self.joined.contains(&room.id) {
            self.descriptors.insert(room.id.clone(), room);
        }
    }

    /// Last-known descriptor, if the server reported one.
    #[must_use]
    pub fn descriptor(&self, room_id: &str) -> Option<&Room> {
        self.descriptors.get(room_id)
    }

    /// Number of joined rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.joined.len()
    }

    /// Whether no rooms are joined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty()
    }

    /// Drop all membership and descriptors. Used by session teardown.
    pub fn clear(&mut self) {
        self.joined.clear();
        self.descriptors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_reflects_net_effect() {
        let mut rooms = RoomRegistry::new();

        assert!(rooms.join("r1"));
        assert!(!rooms.join("r1"));
        assert!(rooms.is_joined("r1"));

        assert!(rooms.leave("r1"));
        assert!(!rooms.leave("r1"));
        assert!(!rooms.is_joined("r1"));

        // Interleaved churn: only the last call counts.
        rooms.join("r2");
        rooms.leave("r2");
        rooms.join("r2");
        assert!(rooms.is_joined("r2"));
        assert_eq!(rooms.len(), 1);
    }

    #[test]
    fn snapshot_is_sorted_and_complete() {
        let mut rooms = RoomRegistry::new();
        rooms.join("zulu");
        rooms.join("alpha");
        rooms.join("mike");

        assert_eq!(rooms.snapshot(), vec!["alpha", "mike", "zulu"]);
    }

    #[test]
    fn descriptors_follow_membership() {
        let room = Room {
            id: "r1".to_string(),
            name: "Main stage".to_string(),
            kind: livepulse_proto::RoomKind::Event,
            event_id: None,
            participants: vec!["u1".to_string()],
            moderators: Vec::new(),
            settings: livepulse_proto::RoomSettings {
                allow_file_sharing: true,
                allow_images: true,
                moderation_enabled: false,
                slow_mode: None,
                max_participants: None,
            },
            created_at: 1,
            last_activity: 2,
        };

        let mut rooms = RoomRegistry::new();

        // Descriptors for rooms we never joined are ignored.
        rooms.update_descriptor(room.clone());
        assert!(rooms.descriptor("r1").is_none());

        rooms.join("r1");
        rooms.update_descriptor(room);
        assert_eq!(rooms.descriptor("r1").map(|r| r.name.as_str()), Some("Main stage"));

        // Leaving drops the cached descriptor with the membership.
        rooms.leave("r1");
        assert!(rooms.descriptor("r1").is_none());
    }

    #[test]
    fn clear_empties_everything() {
        let mut rooms = RoomRegistry::new();
        rooms.join("r1");
        rooms.clear();
        assert!(rooms.is_empty());
        assert!(rooms.snapshot().is_empty());
    }
}
