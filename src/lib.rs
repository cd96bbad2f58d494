//! Multi-room WebSocket Chat Hub Library
//!
//! A real-time chat hub built with tokio-tungstenite: clients connect, join
//! and leave named rooms, and broadcast text messages to room members.
//!
//! # Features
//! - WebSocket connection handling with origin and path checks
//! - Room creation, announced to every connected client
//! - Joining/leaving any number of rooms
//! - Room-wide text messages, delivered to every member including the sender
//! - Correlated `ok_message` / `error_message` acknowledgments
//! - Bounded, ordered per-client delivery
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Hub` is the central actor owning the `Registry` of clients and rooms
//! - Each connection has a `handler` task talking to the hub via `HubHandle`
//! - Each client has an `Outbox`: a bounded queue drained by its own
//!   writer task, so a slow client never holds up the hub or other clients
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use chat_hub::{serve, HubHandle, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Arc::new(ServerConfig::default());
//!     let listener = TcpListener::bind(&config.addr).await.unwrap();
//!     let hub = HubHandle::start(config.command_buffer);
//!
//!     serve(listener, hub, config).await;
//! }
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod delivery;
pub mod error;
pub mod handler;
pub mod message;
pub mod registry;
pub mod room;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use channel::Channel;
pub use client::Client;
pub use config::ServerConfig;
pub use delivery::{CloseReason, DeliveryConfig, DeliveryStats, Outbox, Transport};
pub use error::{AppError, ConfigError, HubError, ProtocolError, RequestError, SendError};
pub use handler::{handle_connection, serve};
pub use message::{ClientMessage, ClientRequest, ErrorCode, RoomSummary, ServerMessage};
pub use registry::{Registry, RegistrySnapshot};
pub use room::Room;
pub use server::{Hub, HubCommand, HubHandle};
pub use types::{ClientId, MessageId, RoomId};
