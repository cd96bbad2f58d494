//! Outbound channel abstraction
//!
//! The registry's only view of a client's transport. Implementations must
//! never block the caller: the registry invokes these while it holds
//! exclusive access to all client and room state.

use std::fmt;

use crate::error::RequestError;
use crate::message::ServerMessage;
use crate::types::MessageId;

/// One client's outbound transport, owned by the transport layer
pub trait Channel: Send + Sync + fmt::Debug {
    /// Queue a message for delivery
    fn send(&self, message: ServerMessage);

    /// Acknowledge a request as successful
    fn respond_ok(&self, message_id: MessageId) {
        self.send(ServerMessage::ok(message_id));
    }

    /// Acknowledge a request as failed
    fn respond_error(&self, message_id: MessageId, err: &RequestError) {
        self.send(ServerMessage::error(message_id, err));
    }

    /// Stop delivering; idempotent, later sends are dropped
    fn close(&self);
}
