//! Message protocol definitions
//!
//! JSON-based bidirectional message protocol using Serde's tagged enum
//! for type-safe serialization/deserialization. Every object carries a
//! `type` and a `message_id`; the latter correlates acknowledgments with
//! the request that caused them.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, RequestError};
use crate::types::{ClientId, MessageId, RoomId};

/// Client → Hub request
///
/// The correlation ID travels next to the typed body instead of through
/// any per-call ambient state.
#[derive(Debug, Deserialize)]
pub struct ClientRequest {
    /// Correlation ID echoed in the acknowledgment
    #[serde(default)]
    pub message_id: MessageId,
    /// Typed request body
    #[serde(flatten)]
    pub message: ClientMessage,
}

/// Client → Hub message body
///
/// Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join an existing room
    JoinRoom { room_id: RoomId },
    /// Leave a joined room
    LeaveRoom { room_id: RoomId },
    /// Create a new room
    CreateNewRoom { name: String },
    /// Send a text message to a joined room
    SendMessage { room_id: RoomId, content: String },
}

impl ClientMessage {
    /// Every `type` value a client may send
    pub const TYPES: [&'static str; 4] =
        ["join_room", "leave_room", "create_new_room", "send_message"];
}

/// Room listing entry
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
}

/// Hub → Client message
///
/// Closed set of outbound events, matched exhaustively when framed for the
/// wire. Acknowledgments keep their correlation ID out of the body; it is
/// written once by [`ServerMessage::to_json`] for every variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Snapshot of known rooms, sent once on connect
    Hello { rooms: Vec<RoomSummary> },
    /// A room was created (broadcast to everyone)
    NewRoomCreated { id: RoomId, name: String },
    /// Text message delivered to room members
    MessageReceived {
        room_id: RoomId,
        from: ClientId,
        from_name: String,
        msg: String,
    },
    /// Request succeeded
    OkMessage {
        #[serde(skip)]
        message_id: MessageId,
    },
    /// Request failed
    ErrorMessage {
        #[serde(skip)]
        message_id: MessageId,
        error: ErrorCode,
    },
}

/// Error codes for ServerMessage::ErrorMessage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Non-existent room ID
    RoomNotFound,
    /// Operation requires room membership
    ClientNotInRoom,
    /// Operation names an unknown client
    ClientNotFound,
}

#[derive(Serialize)]
struct Frame<'a> {
    #[serde(flatten)]
    message: &'a ServerMessage,
    message_id: MessageId,
}

impl ServerMessage {
    /// Success acknowledgment for the given request
    pub fn ok(message_id: MessageId) -> Self {
        ServerMessage::OkMessage { message_id }
    }

    /// Failure acknowledgment for the given request
    pub fn error(message_id: MessageId, err: &RequestError) -> Self {
        ServerMessage::ErrorMessage {
            message_id,
            error: err.code(),
        }
    }

    /// Correlation ID this message answers, 0 for unsolicited events
    pub fn message_id(&self) -> MessageId {
        match self {
            ServerMessage::OkMessage { message_id } | ServerMessage::ErrorMessage { message_id, .. } => {
                *message_id
            }
            ServerMessage::Hello { .. }
            | ServerMessage::NewRoomCreated { .. }
            | ServerMessage::MessageReceived { .. } => MessageId::UNSOLICITED,
        }
    }

    /// Encode as one wire frame
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Frame {
            message: self,
            message_id: self.message_id(),
        })
    }
}

/// Classified inbound text frame
#[derive(Debug)]
pub enum Inbound {
    /// Well-formed request
    Request(ClientRequest),
    /// Known `type` whose body does not parse; logged and ignored
    Malformed {
        kind: String,
        message_id: MessageId,
        reason: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message_id: MessageId,
}

/// Parse a text frame from a client
///
/// Anything without a recognizable envelope, or with a `type` the hub does
/// not know, is a protocol violation and ends the connection.
pub fn parse_client_frame(text: &str) -> Result<Inbound, ProtocolError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(ProtocolError::InvalidEnvelope)?;

    if !ClientMessage::TYPES.contains(&envelope.kind.as_str()) {
        return Err(ProtocolError::UnknownType(envelope.kind));
    }

    match serde_json::from_str::<ClientRequest>(text) {
        Ok(request) => Ok(Inbound::Request(request)),
        Err(reason) => Ok(Inbound::Malformed {
            kind: envelope.kind,
            message_id: envelope.message_id,
            reason,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_request_deserialize() {
        let json = r#"{"type": "send_message", "message_id": 7, "room_id": "r1", "content": "hi"}"#;
        let request: ClientRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.message_id, MessageId(7));
        assert_eq!(
            request.message,
            ClientMessage::SendMessage {
                room_id: RoomId::from("r1"),
                content: "hi".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_message_id_defaults_to_zero() {
        let json = r#"{"type": "create_new_room", "name": "general"}"#;
        let Inbound::Request(request) = parse_client_frame(json).unwrap() else {
            panic!("Wrong variant");
        };
        assert_eq!(request.message_id, MessageId(0));
    }

    #[test]
    fn test_known_type_with_bad_body_is_malformed() {
        let json = r#"{"type": "join_room", "message_id": 3}"#;
        match parse_client_frame(json).unwrap() {
            Inbound::Malformed { kind, message_id, .. } => {
                assert_eq!(kind, "join_room");
                assert_eq!(message_id, MessageId(3));
            }
            Inbound::Request(_) => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_unknown_type_is_protocol_error() {
        let err = parse_client_frame(r#"{"type": "shout", "message_id": 1}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(kind) if kind == "shout"));
    }

    #[test]
    fn test_garbage_is_protocol_error() {
        assert!(matches!(
            parse_client_frame("not json"),
            Err(ProtocolError::InvalidEnvelope(_))
        ));
        assert!(matches!(
            parse_client_frame(r#"{"message_id": 1}"#),
            Err(ProtocolError::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn test_ok_message_carries_correlation_id() {
        let json = ServerMessage::ok(MessageId(12)).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value, serde_json::json!({"type": "ok_message", "message_id": 12}));
    }

    #[test]
    fn test_error_message_serialize() {
        let err = RequestError::RoomNotFound(RoomId::from("r1"));
        let json = ServerMessage::error(MessageId(4), &err).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"type": "error_message", "message_id": 4, "error": "room_not_found"})
        );
    }

    #[test]
    fn test_broadcasts_use_unsolicited_id() {
        let msg = ServerMessage::MessageReceived {
            room_id: RoomId::from("r1"),
            from: ClientId::from("c1"),
            from_name: "Alice".to_string(),
            msg: "hi".to_string(),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "message_received");
        assert_eq!(value["message_id"], 0);
        assert_eq!(value["from_name"], "Alice");
    }

    #[test]
    fn test_hello_lists_rooms() {
        let msg = ServerMessage::Hello {
            rooms: vec![RoomSummary {
                id: RoomId::from("r1"),
                name: "general".to_string(),
            }],
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["rooms"], serde_json::json!([{"id": "r1", "name": "general"}]));
    }
}
