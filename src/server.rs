//! Hub actor implementation
//!
//! The central actor that owns the [`Registry`]. Connection handlers talk to
//! it through a cloneable [`HubHandle`]; commands are processed one at a
//! time, which makes every registry operation atomic with respect to every
//! other without any locks.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::channel::Channel;
use crate::error::{HubError, RequestError};
use crate::message::RoomSummary;
use crate::registry::{Registry, RegistrySnapshot};
use crate::types::{ClientId, MessageId, RoomId};

/// Default depth of the hub command queue
pub const DEFAULT_COMMAND_BUFFER: usize = 256;

/// Reply slot carried by each command
pub type Reply<T> = oneshot::Sender<T>;

/// Commands sent from handlers to the Hub actor
#[derive(Debug)]
pub enum HubCommand {
    /// New client connected
    Connect {
        client_id: ClientId,
        name: String,
        channel: Arc<dyn Channel>,
        reply: Reply<()>,
    },
    /// Client disconnected
    Disconnect {
        client_id: ClientId,
        reply: Reply<Result<(), RequestError>>,
    },
    /// Connection ended; disconnect unless the session was replaced
    Release {
        client_id: ClientId,
        channel: Arc<dyn Channel>,
        reply: Reply<Result<(), RequestError>>,
    },
    /// Create a new room
    CreateRoom {
        client_id: ClientId,
        name: String,
        message_id: MessageId,
        reply: Reply<Result<RoomId, RequestError>>,
    },
    /// Join an existing room
    JoinRoom {
        client_id: ClientId,
        room_id: RoomId,
        message_id: MessageId,
        reply: Reply<Result<(), RequestError>>,
    },
    /// Leave a joined room
    LeaveRoom {
        client_id: ClientId,
        room_id: RoomId,
        message_id: MessageId,
        reply: Reply<Result<(), RequestError>>,
    },
    /// Send a text message to a room
    SendMessage {
        client_id: ClientId,
        room_id: RoomId,
        content: String,
        message_id: MessageId,
        reply: Reply<Result<(), RequestError>>,
    },
    /// List known rooms
    ListRooms { reply: Reply<Vec<RoomSummary>> },
    /// Copy the membership relation
    Snapshot { reply: Reply<RegistrySnapshot> },
}

/// The main Hub actor
///
/// Owns all client and room state and processes commands from handlers.
pub struct Hub {
    registry: Registry,
    /// Command receiver channel
    receiver: mpsc::Receiver<HubCommand>,
}

impl Hub {
    /// Create a new Hub with the given command receiver
    pub fn new(receiver: mpsc::Receiver<HubCommand>) -> Self {
        Self {
            registry: Registry::new(),
            receiver,
        }
    }

    /// Run the Hub event loop
    ///
    /// Continuously receives and processes commands until all handles are dropped.
    pub async fn run(mut self) {
        info!("Hub started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            "Hub shutting down with {} clients, {} rooms",
            self.registry.client_count(),
            self.registry.room_count()
        );
    }

    /// Process a single command
    ///
    /// A dropped reply receiver only means the caller stopped waiting.
    fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Connect {
                client_id,
                name,
                channel,
                reply,
            } => {
                self.registry.connect(client_id, name, channel);
                let _ = reply.send(());
            }
            HubCommand::Disconnect { client_id, reply } => {
                let _ = reply.send(self.registry.disconnect(&client_id));
            }
            HubCommand::Release {
                client_id,
                channel,
                reply,
            } => {
                let _ = reply.send(self.registry.release(&client_id, &channel));
            }
            HubCommand::CreateRoom {
                client_id,
                name,
                message_id,
                reply,
            } => {
                let _ = reply.send(self.registry.create_room(name, &client_id, message_id));
            }
            HubCommand::JoinRoom {
                client_id,
                room_id,
                message_id,
                reply,
            } => {
                let _ = reply.send(self.registry.join_room(&client_id, &room_id, message_id));
            }
            HubCommand::LeaveRoom {
                client_id,
                room_id,
                message_id,
                reply,
            } => {
                let _ = reply.send(self.registry.leave_room(&client_id, &room_id, message_id));
            }
            HubCommand::SendMessage {
                client_id,
                room_id,
                content,
                message_id,
                reply,
            } => {
                let result =
                    self.registry
                        .send_message_to_room(&client_id, &room_id, content, message_id);
                let _ = reply.send(result);
            }
            HubCommand::ListRooms { reply } => {
                let _ = reply.send(self.registry.list_rooms());
            }
            HubCommand::Snapshot { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
        }
    }
}

/// Cloneable handle to a running Hub
#[derive(Debug, Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Wrap an existing command sender
    pub fn new(sender: mpsc::Sender<HubCommand>) -> Self {
        Self { sender }
    }

    /// Spawn a Hub actor and return a handle to it
    pub fn start(buffer: usize) -> Self {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        tokio::spawn(Hub::new(receiver).run());
        debug!("Hub actor spawned (buffer {})", buffer);
        Self::new(sender)
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> HubCommand) -> Result<T, HubError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .await
            .map_err(|_| HubError::Closed)?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Register a client; it receives the room list on its channel
    pub async fn connect(
        &self,
        client_id: ClientId,
        name: String,
        channel: Arc<dyn Channel>,
    ) -> Result<(), HubError> {
        self.request(|reply| HubCommand::Connect {
            client_id,
            name,
            channel,
            reply,
        })
        .await
    }

    /// Remove a client from all rooms and close its channel
    pub async fn disconnect(&self, client_id: ClientId) -> Result<(), HubError> {
        Ok(self
            .request(|reply| HubCommand::Disconnect { client_id, reply })
            .await??)
    }

    /// Disconnect a client if `channel` still belongs to its current session
    pub async fn release(
        &self,
        client_id: ClientId,
        channel: Arc<dyn Channel>,
    ) -> Result<(), HubError> {
        Ok(self
            .request(|reply| HubCommand::Release {
                client_id,
                channel,
                reply,
            })
            .await??)
    }

    /// Create a room on behalf of a client
    pub async fn create_room(
        &self,
        client_id: ClientId,
        name: String,
        message_id: MessageId,
    ) -> Result<RoomId, HubError> {
        Ok(self
            .request(|reply| HubCommand::CreateRoom {
                client_id,
                name,
                message_id,
                reply,
            })
            .await??)
    }

    /// Join a room
    pub async fn join_room(
        &self,
        client_id: ClientId,
        room_id: RoomId,
        message_id: MessageId,
    ) -> Result<(), HubError> {
        Ok(self
            .request(|reply| HubCommand::JoinRoom {
                client_id,
                room_id,
                message_id,
                reply,
            })
            .await??)
    }

    /// Leave a room
    pub async fn leave_room(
        &self,
        client_id: ClientId,
        room_id: RoomId,
        message_id: MessageId,
    ) -> Result<(), HubError> {
        Ok(self
            .request(|reply| HubCommand::LeaveRoom {
                client_id,
                room_id,
                message_id,
                reply,
            })
            .await??)
    }

    /// Send a text message to every member of a room
    pub async fn send_message_to_room(
        &self,
        client_id: ClientId,
        room_id: RoomId,
        content: String,
        message_id: MessageId,
    ) -> Result<(), HubError> {
        Ok(self
            .request(|reply| HubCommand::SendMessage {
                client_id,
                room_id,
                content,
                message_id,
                reply,
            })
            .await??)
    }

    /// All known rooms
    pub async fn list_rooms(&self) -> Result<Vec<RoomSummary>, HubError> {
        self.request(|reply| HubCommand::ListRooms { reply }).await
    }

    /// Current membership relation
    pub async fn snapshot(&self) -> Result<RegistrySnapshot, HubError> {
        self.request(|reply| HubCommand::Snapshot { reply }).await
    }
}
