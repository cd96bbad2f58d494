//! Room struct definition
//!
//! Represents a named chat room and the clients currently in it.

use std::collections::HashSet;

use crate::message::RoomSummary;
use crate::types::{ClientId, RoomId};

/// Multi-member chat room
///
/// Holds the authoritative member set. Rooms are never deleted, even when
/// the last member leaves.
#[derive(Debug)]
pub struct Room {
    /// Unique identifier for this room
    pub id: RoomId,
    /// Display name (not required to be unique)
    pub name: String,
    /// Clients currently in the room
    members: HashSet<ClientId>,
}

impl Room {
    /// Create an empty room
    pub fn new(id: RoomId, name: String) -> Self {
        Self {
            id,
            name,
            members: HashSet::new(),
        }
    }

    /// Add a member; returns false if already present
    pub fn add_member(&mut self, client_id: ClientId) -> bool {
        self.members.insert(client_id)
    }

    /// Remove a member; returns false if it was not present
    pub fn remove_member(&mut self, client_id: &ClientId) -> bool {
        self.members.remove(client_id)
    }

    /// Check if a client is in this room
    pub fn is_member(&self, client_id: &ClientId) -> bool {
        self.members.contains(client_id)
    }

    /// Iterate over current members
    pub fn members(&self) -> impl Iterator<Item = &ClientId> {
        self.members.iter()
    }

    /// Get the number of members in the room
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Listing entry for this room
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}
