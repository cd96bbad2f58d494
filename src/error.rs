//! Error types for the chat hub
//!
//! Defines fatal application errors, request-scoped errors reported back to
//! clients, and per-recipient delivery errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::message::ErrorCode;
use crate::types::{ClientId, RoomId};

/// Application-level errors
///
/// Fatal for the connection or the process: the connection is torn down
/// rather than answered with an `error_message`.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Hub actor unavailable
    #[error("Hub error: {0}")]
    Hub(#[from] HubError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Request-scoped errors
///
/// Recoverable: reported to the originating client as a correlated
/// `error_message`, never affecting other clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Target room is not registered
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    /// Operation requires membership the client lacks
    #[error("Client {client_id} is not in room {room_id}")]
    ClientNotInRoom { client_id: ClientId, room_id: RoomId },

    /// Operation names a client that is not connected
    #[error("Client not found: {0}")]
    ClientNotFound(ClientId),
}

impl RequestError {
    /// Wire error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            RequestError::RoomNotFound(_) => ErrorCode::RoomNotFound,
            RequestError::ClientNotInRoom { .. } => ErrorCode::ClientNotInRoom,
            RequestError::ClientNotFound(_) => ErrorCode::ClientNotFound,
        }
    }
}

/// Errors returned by `HubHandle` calls
#[derive(Debug, Error)]
pub enum HubError {
    /// The operation itself failed
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The hub actor has shut down
    #[error("Hub closed")]
    Closed,
}

/// Message send errors
///
/// Local to one recipient; never propagated to the sender of a broadcast.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the transport has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The message could not be encoded for the wire
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Protocol violations by a client
///
/// The connection is closed with a protocol-error status.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not a JSON object with a string `type`
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(serde_json::Error),

    /// `type` names no known request
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// Binary frames are not part of the protocol
    #[error("Binary frame")]
    BinaryFrame,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable is set but holds an unusable value
    #[error("Invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}
