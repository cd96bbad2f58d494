//! Registry of clients and rooms
//!
//! Sole owner of every [`Client`] and [`Room`]. Every operation takes
//! `&mut self`, so whoever holds the registry (the hub actor) serializes
//! them, and both sides of a membership change land together before any
//! other operation can look.
//!
//! Outbound messages are only queued on client channels here; nothing in
//! this module waits on delivery.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::client::Client;
use crate::error::RequestError;
use crate::message::{RoomSummary, ServerMessage};
use crate::room::Room;
use crate::types::{ClientId, MessageId, RoomId};

/// Point-in-time copy of the membership relation, seen from both sides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    /// Client → joined rooms
    pub clients: BTreeMap<ClientId, BTreeSet<RoomId>>,
    /// Room → members
    pub rooms: BTreeMap<RoomId, BTreeSet<ClientId>>,
}

impl RegistrySnapshot {
    /// Check that `room ∈ client.rooms` exactly when `client ∈ room.members`
    pub fn is_consistent(&self) -> bool {
        let clients_agree = self.clients.iter().all(|(client_id, rooms)| {
            rooms.iter().all(|room_id| {
                self.rooms
                    .get(room_id)
                    .is_some_and(|members| members.contains(client_id))
            })
        });
        let rooms_agree = self.rooms.iter().all(|(room_id, members)| {
            members.iter().all(|client_id| {
                self.clients
                    .get(client_id)
                    .is_some_and(|rooms| rooms.contains(room_id))
            })
        });
        clients_agree && rooms_agree
    }
}

/// The registry
///
/// Uses HashMap for O(1) lookups on clients and rooms.
#[derive(Debug, Default)]
pub struct Registry {
    /// All connected clients: ClientId -> Client
    clients: HashMap<ClientId, Client>,
    /// All rooms: RoomId -> Room
    rooms: HashMap<RoomId, Room>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client and send it the room list
    ///
    /// IDs are not validated for uniqueness: a second connect with a live ID
    /// evicts the earlier session first.
    pub fn connect(&mut self, client_id: ClientId, name: String, channel: Arc<dyn Channel>) {
        if self.clients.contains_key(&client_id) {
            warn!("Client {} reconnected, evicting previous session", client_id);
            // Present, so this cannot fail
            let _ = self.disconnect(&client_id);
        }

        let client = Client::new(client_id.clone(), name, channel);
        client.send(ServerMessage::Hello {
            rooms: self.list_rooms(),
        });

        info!("Client {} ({}) connected", client_id, client.name);
        self.clients.insert(client_id, client);
        debug!(
            "Total clients: {}, Total rooms: {}",
            self.clients.len(),
            self.rooms.len()
        );
    }

    /// Remove a client from every room, close its channel, and forget it
    pub fn disconnect(&mut self, client_id: &ClientId) -> Result<(), RequestError> {
        let Some(mut client) = self.clients.remove(client_id) else {
            debug!("Disconnect for unknown client {}", client_id);
            return Err(RequestError::ClientNotFound(client_id.clone()));
        };

        for room_id in client.remove_all_rooms() {
            if let Some(room) = self.rooms.get_mut(&room_id) {
                room.remove_member(client_id);
            }
        }
        client.close();

        info!("Client {} disconnected", client_id);
        debug!(
            "Total clients: {}, Total rooms: {}",
            self.clients.len(),
            self.rooms.len()
        );
        Ok(())
    }

    /// Disconnect a client only while `channel` is still its channel
    ///
    /// Used by connection handlers on exit, so a session that was replaced
    /// by a reconnect with the same ID cannot tear down its successor.
    pub fn release(
        &mut self,
        client_id: &ClientId,
        channel: &Arc<dyn Channel>,
    ) -> Result<(), RequestError> {
        let current = self
            .clients
            .get(client_id)
            .is_some_and(|client| client.uses_channel(channel));
        if !current {
            debug!("Session for {} already replaced or gone", client_id);
            return Err(RequestError::ClientNotFound(client_id.clone()));
        }
        self.disconnect(client_id)
    }

    /// Create a room and announce it to everyone
    ///
    /// The requester gets its acknowledgment first, then the same
    /// `new_room_created` broadcast as every other client.
    pub fn create_room(
        &mut self,
        name: String,
        requester: &ClientId,
        message_id: MessageId,
    ) -> Result<RoomId, RequestError> {
        let Some(client) = self.clients.get(requester) else {
            return Err(RequestError::ClientNotFound(requester.clone()));
        };

        // Generate unique room ID
        let room_id = loop {
            let id = RoomId::generate();
            if !self.rooms.contains_key(&id) {
                break id;
            }
        };

        self.rooms
            .insert(room_id.clone(), Room::new(room_id.clone(), name.clone()));
        info!("Client {} created room {} ({})", requester, room_id, name);

        client.respond_ok(message_id);
        self.broadcast(&ServerMessage::NewRoomCreated {
            id: room_id.clone(),
            name,
        });

        Ok(room_id)
    }

    /// Add a client to a room
    ///
    /// Joining a room twice is a no-op that still succeeds.
    pub fn join_room(
        &mut self,
        client_id: &ClientId,
        room_id: &RoomId,
        message_id: MessageId,
    ) -> Result<(), RequestError> {
        let client = self
            .clients
            .get_mut(client_id)
            .ok_or_else(|| RequestError::ClientNotFound(client_id.clone()))?;

        let Some(room) = self.rooms.get_mut(room_id) else {
            return reject(client, message_id, RequestError::RoomNotFound(room_id.clone()));
        };

        room.add_member(client_id.clone());
        client.add_room(room_id.clone());
        debug!("Client {} joined room {}", client_id, room_id);

        client.respond_ok(message_id);
        Ok(())
    }

    /// Remove a client from a room it has joined
    pub fn leave_room(
        &mut self,
        client_id: &ClientId,
        room_id: &RoomId,
        message_id: MessageId,
    ) -> Result<(), RequestError> {
        let client = self
            .clients
            .get_mut(client_id)
            .ok_or_else(|| RequestError::ClientNotFound(client_id.clone()))?;

        let Some(room) = self.rooms.get_mut(room_id) else {
            return reject(client, message_id, RequestError::RoomNotFound(room_id.clone()));
        };

        if !room.remove_member(client_id) {
            let err = RequestError::ClientNotInRoom {
                client_id: client_id.clone(),
                room_id: room_id.clone(),
            };
            return reject(client, message_id, err);
        }
        client.remove_room(room_id);
        debug!("Client {} left room {}", client_id, room_id);

        client.respond_ok(message_id);
        Ok(())
    }

    /// Deliver a text message to every member of a room, sender included
    pub fn send_message_to_room(
        &self,
        client_id: &ClientId,
        room_id: &RoomId,
        content: String,
        message_id: MessageId,
    ) -> Result<(), RequestError> {
        let sender = self
            .clients
            .get(client_id)
            .ok_or_else(|| RequestError::ClientNotFound(client_id.clone()))?;

        let Some(room) = self.rooms.get(room_id) else {
            return reject(sender, message_id, RequestError::RoomNotFound(room_id.clone()));
        };

        if !room.is_member(client_id) {
            let err = RequestError::ClientNotInRoom {
                client_id: client_id.clone(),
                room_id: room_id.clone(),
            };
            return reject(sender, message_id, err);
        }

        let msg = ServerMessage::MessageReceived {
            room_id: room_id.clone(),
            from: client_id.clone(),
            from_name: sender.name.clone(),
            msg: content,
        };
        for member in room.members().filter_map(|id| self.clients.get(id)) {
            member.send(msg.clone());
        }
        debug!(
            "Client {} sent to room {} ({} members)",
            client_id,
            room_id,
            room.member_count()
        );

        sender.respond_ok(message_id);
        Ok(())
    }

    /// All known rooms, in creation order
    pub fn list_rooms(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = self.rooms.values().map(Room::summary).collect();
        rooms.sort();
        rooms
    }

    /// Copy of the membership relation
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            clients: self
                .clients
                .iter()
                .map(|(id, client)| (id.clone(), client.rooms().cloned().collect()))
                .collect(),
            rooms: self
                .rooms
                .iter()
                .map(|(id, room)| (id.clone(), room.members().cloned().collect()))
                .collect(),
        }
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Number of rooms
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn broadcast(&self, msg: &ServerMessage) {
        for client in self.clients.values() {
            client.send(msg.clone());
        }
    }
}

/// Report a failed request to its sender and return the error
fn reject<T>(client: &Client, message_id: MessageId, err: RequestError) -> Result<T, RequestError> {
    debug!("Request {} from {} failed: {}", message_id, client.id, err);
    client.respond_error(message_id, &err);
    Err(err)
}
