//! Client struct definition
//!
//! Represents a connected session with its display name, the rooms it has
//! joined, and the channel its outbound messages go through.

use std::collections::HashSet;
use std::sync::Arc;

use crate::channel::Channel;
use crate::error::RequestError;
use crate::message::ServerMessage;
use crate::types::{ClientId, MessageId, RoomId};

/// Connected client information
///
/// The `rooms` set is one half of the membership relation; the other half
/// lives in each [`Room`](crate::room::Room). Only the registry mutates
/// either side, and always both together.
#[derive(Debug)]
pub struct Client {
    /// Unique identifier for this client
    pub id: ClientId,
    /// Display name shown to other room members
    pub name: String,
    /// Rooms this client has joined
    rooms: HashSet<RoomId>,
    /// Hub → Client outbound channel (owned by the transport layer)
    channel: Arc<dyn Channel>,
}

impl Client {
    /// Create a new client with no room memberships
    pub fn new(id: ClientId, name: String, channel: Arc<dyn Channel>) -> Self {
        Self {
            id,
            name,
            rooms: HashSet::new(),
            channel,
        }
    }

    /// Queue a message for this client
    ///
    /// Never blocks; delivery failures stay with the channel.
    pub fn send(&self, msg: ServerMessage) {
        self.channel.send(msg);
    }

    /// Acknowledge a request as successful
    pub fn respond_ok(&self, message_id: MessageId) {
        self.channel.respond_ok(message_id);
    }

    /// Acknowledge a request as failed
    pub fn respond_error(&self, message_id: MessageId, err: &RequestError) {
        self.channel.respond_error(message_id, err);
    }

    /// Close the outbound channel
    pub fn close(&self) {
        self.channel.close();
    }

    /// Check if this session is bound to the given channel
    pub fn uses_channel(&self, channel: &Arc<dyn Channel>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.channel), Arc::as_ptr(channel))
    }

    /// Record a room membership; returns false if already present
    pub fn add_room(&mut self, room_id: RoomId) -> bool {
        self.rooms.insert(room_id)
    }

    /// Drop a room membership; returns false if it was not present
    pub fn remove_room(&mut self, room_id: &RoomId) -> bool {
        self.rooms.remove(room_id)
    }

    /// Drop every membership, returning the rooms that were joined
    pub fn remove_all_rooms(&mut self) -> Vec<RoomId> {
        self.rooms.drain().collect()
    }

    /// Check if this client has joined a room
    pub fn is_in_room(&self, room_id: &RoomId) -> bool {
        self.rooms.contains(room_id)
    }

    /// Iterate over joined rooms
    pub fn rooms(&self) -> impl Iterator<Item = &RoomId> {
        self.rooms.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::RecordingChannel;

    fn client() -> (Client, Arc<RecordingChannel>) {
        let channel = Arc::new(RecordingChannel::default());
        let client = Client::new(ClientId::from("c1"), "Alice".to_string(), channel.clone());
        (client, channel)
    }

    #[test]
    fn test_client_creation() {
        let (client, _) = client();

        assert_eq!(client.name, "Alice");
        assert_eq!(client.rooms().count(), 0);
    }

    #[test]
    fn test_client_rooms() {
        let (mut client, _) = client();
        let general = RoomId::from("general");
        let random = RoomId::from("random");

        assert!(client.add_room(general.clone()));
        assert!(!client.add_room(general.clone()));
        assert!(client.add_room(random.clone()));
        assert!(client.is_in_room(&general));

        assert!(client.remove_room(&general));
        assert!(!client.remove_room(&general));
        assert!(!client.is_in_room(&general));

        assert_eq!(client.remove_all_rooms(), vec![random]);
        assert_eq!(client.rooms().count(), 0);
    }

    #[test]
    fn test_client_forwards_to_channel() {
        let (client, channel) = client();

        client.respond_ok(MessageId(1));
        client.respond_error(MessageId(2), &RequestError::ClientNotFound(ClientId::from("x")));
        client.close();
        client.respond_ok(MessageId(3));

        assert_eq!(
            channel.take(),
            vec![
                ServerMessage::ok(MessageId(1)),
                ServerMessage::error(
                    MessageId(2),
                    &RequestError::ClientNotFound(ClientId::from("x"))
                ),
            ]
        );
        assert!(channel.is_closed());
    }
}
