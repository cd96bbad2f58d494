//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake, inbound
//! frame parsing, and wiring the connection's write half into an
//! [`Outbox`] registered with the hub.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::{HOST, ORIGIN};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::channel::Channel;
use crate::config::ServerConfig;
use crate::delivery::{CloseReason, Outbox, Transport};
use crate::error::{AppError, HubError, ProtocolError, SendError};
use crate::message::{parse_client_frame, ClientMessage, ClientRequest, Inbound, ServerMessage};
use crate::server::HubHandle;
use crate::types::ClientId;

type WsStream = WebSocketStream<TcpStream>;

/// Accept connections forever, one handler task each
pub async fn serve(listener: TcpListener, hub: HubHandle, config: Arc<ServerConfig>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let hub = hub.clone();
                let config = Arc::clone(&config);

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, hub, config).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Who a connection claims to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub client_id: ClientId,
    pub name: String,
}

/// Handle a new TCP connection
///
/// Performs the WebSocket handshake, registers the client with the hub,
/// and runs until either side of the connection ends.
pub async fn handle_connection(
    stream: TcpStream,
    hub: HubHandle,
    config: Arc<ServerConfig>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake
    let mut identity = None;
    let handshake = tokio_tungstenite::accept_hdr_async(stream, |request: &Request, response: Response| {
        identity = Some(check_handshake(request, &config)?);
        Ok(response)
    })
    .await;
    let ws_stream = match handshake {
        Ok(ws_stream) => ws_stream,
        Err(WsError::Http(response)) => {
            warn!("Rejected handshake from {} ({})", peer_addr, response.status());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    // The callback ran and accepted, so the identity is always set here
    let Some(Identity { client_id, name }) = identity else {
        return Ok(());
    };
    let (ws_sender, ws_receiver) = ws_stream.split();

    info!("Client {} ({}) connected from {}", client_id, name, peer_addr);

    // Outbound queue + write task (ServerMessage -> WebSocket)
    let (outbox, mut write_task) = Outbox::spawn(
        client_id.clone(),
        WsTransport { sink: ws_sender },
        &config.delivery,
    );
    let channel: Arc<dyn Channel> = outbox.clone();

    // Register with the hub
    if let Err(e) = hub.connect(client_id.clone(), name, Arc::clone(&channel)).await {
        error!("Failed to register client {} - hub closed", client_id);
        outbox.close();
        return Err(e.into());
    }

    // Spawn read task (WebSocket -> hub)
    let mut read_task = tokio::spawn(read_loop(
        ws_receiver,
        hub.clone(),
        client_id.clone(),
        Arc::clone(&outbox),
    ));

    // Wait for either task to complete
    tokio::select! {
        _ = &mut read_task => {
            debug!("Read task completed for {}", client_id);
        }
        reason = &mut write_task => {
            debug!("Write task completed for {} ({:?})", client_id, reason);
            read_task.abort();
        }
    }

    match hub.release(client_id.clone(), channel).await {
        Ok(()) | Err(HubError::Request(_)) => {}
        Err(e) => warn!("Could not release {}: {}", client_id, e),
    }

    // Let the close frame go out before dropping the socket
    if !write_task.is_finished() {
        let _ = write_task.await;
    }

    let stats = outbox.stats();
    info!(
        "Client {} disconnected (delivered {}, dropped {}, timed out {})",
        client_id, stats.delivered, stats.dropped, stats.timed_out
    );

    Ok(())
}

/// Forward client frames to the hub until the connection ends
async fn read_loop(
    mut ws_receiver: SplitStream<WsStream>,
    hub: HubHandle,
    client_id: ClientId,
    outbox: Arc<Outbox>,
) {
    while let Some(msg_result) = ws_receiver.next().await {
        let text = match msg_result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(_)) => {
                protocol_violation(&client_id, &outbox, ProtocolError::BinaryFrame);
                break;
            }
            Ok(Message::Close(_)) => {
                debug!("Client {} sent close frame", client_id);
                break;
            }
            Ok(_) => {
                // Ping/Pong are answered by tungstenite
                continue;
            }
            Err(e) => {
                debug!("WebSocket error for {}: {}", client_id, e);
                break;
            }
        };

        match parse_client_frame(&text) {
            Ok(Inbound::Request(request)) => {
                if let Err(HubError::Closed) = dispatch(&hub, &client_id, request).await {
                    debug!("Hub closed, ending read task for {}", client_id);
                    break;
                }
            }
            Ok(Inbound::Malformed {
                kind,
                message_id,
                reason,
            }) => {
                warn!(
                    "Ignoring malformed {} message {} from {}: {}",
                    kind, message_id, client_id, reason
                );
            }
            Err(err) => {
                protocol_violation(&client_id, &outbox, err);
                break;
            }
        }
    }
    debug!("Read task ended for {}", client_id);
}

fn protocol_violation(client_id: &ClientId, outbox: &Outbox, err: ProtocolError) {
    warn!("Protocol violation from {}: {}", client_id, err);
    outbox.close_with(CloseReason::ProtocolError);
}

/// Run one request against the hub
///
/// Request-level failures were already reported to the client by the
/// registry; only a closed hub is returned.
async fn dispatch(hub: &HubHandle, client_id: &ClientId, request: ClientRequest) -> Result<(), HubError> {
    let ClientRequest {
        message_id,
        message,
    } = request;
    let client_id = client_id.clone();

    let result = match message {
        ClientMessage::JoinRoom { room_id } => hub.join_room(client_id.clone(), room_id, message_id).await,
        ClientMessage::LeaveRoom { room_id } => hub.leave_room(client_id.clone(), room_id, message_id).await,
        ClientMessage::CreateNewRoom { name } => hub
            .create_room(client_id.clone(), name, message_id)
            .await
            .map(|room_id| debug!("Room {} created for request {}", room_id, message_id)),
        ClientMessage::SendMessage { room_id, content } => {
            hub.send_message_to_room(client_id.clone(), room_id, content, message_id)
                .await
        }
    };

    match result {
        Err(HubError::Request(err)) => {
            debug!("Request {} from {} rejected: {}", message_id, client_id, err);
            Ok(())
        }
        other => other,
    }
}

/// Validate the upgrade request and extract the client's identity
pub fn check_handshake(request: &Request, config: &ServerConfig) -> Result<Identity, ErrorResponse> {
    if request.uri().path() != config.ws_path {
        return Err(reject(StatusCode::NOT_FOUND, "Not found"));
    }
    if !origin_allowed(request, &config.allowed_origins) {
        return Err(reject(StatusCode::FORBIDDEN, "Origin not allowed"));
    }
    Ok(client_identity(request))
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Identity from the `client_id` and `name` headers, generated when absent
pub fn client_identity(request: &Request) -> Identity {
    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    Identity {
        client_id: header("client_id").map(ClientId).unwrap_or_else(ClientId::generate),
        name: header("name").unwrap_or_else(guest_name),
    }
}

/// Requests without an Origin header are accepted (non-browser clients);
/// otherwise the origin must be this host or explicitly allowed.
pub fn origin_allowed(request: &Request, allowed: &[String]) -> bool {
    let Some(origin) = request.headers().get(ORIGIN) else {
        return true;
    };
    let Some(origin_host) = origin
        .to_str()
        .ok()
        .and_then(|origin| Url::parse(origin).ok())
        .and_then(|url| host_with_port(&url))
    else {
        return false;
    };

    let same_host = request
        .headers()
        .get(HOST)
        .and_then(|host| host.to_str().ok())
        .is_some_and(|host| host.eq_ignore_ascii_case(&origin_host));

    same_host || allowed.iter().any(|a| a.eq_ignore_ascii_case(&origin_host))
}

fn host_with_port(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Generate a display name for clients that did not send one
fn guest_name() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(6)
        .map(char::from)
        .collect::<String>()
        .to_uppercase();
    format!("Guest-{}", suffix)
}

/// Write half of a WebSocket connection
struct WsTransport {
    sink: SplitSink<WsStream, Message>,
}

impl Transport for WsTransport {
    async fn deliver(&mut self, message: &ServerMessage) -> Result<(), SendError> {
        let json = message.to_json()?;
        self.sink
            .send(Message::Text(json.into()))
            .await
            .map_err(|_| SendError::ChannelClosed)
    }

    async fn shutdown(&mut self, reason: CloseReason) {
        let frame = match reason {
            CloseReason::Normal => None,
            CloseReason::ProtocolError => Some(CloseFrame {
                code: CloseCode::Protocol,
                reason: "invalid message type".into(),
            }),
            CloseReason::Stalled => Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "client too slow".into(),
            }),
        };

        // Errors here only mean the peer is already gone
        let _ = self.sink.send(Message::Close(frame)).await;
        let _ = self.sink.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(headers: &[(&str, &str)]) -> Request {
        let mut builder = Request::builder().uri("/ws");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_identity_from_headers() {
        let identity = client_identity(&request(&[("client_id", "abc"), ("name", "Alice")]));
        assert_eq!(
            identity,
            Identity {
                client_id: ClientId::from("abc"),
                name: "Alice".to_string()
            }
        );
    }

    #[test]
    fn test_identity_generated_when_missing() {
        let first = client_identity(&request(&[]));
        let second = client_identity(&request(&[("name", "  ")]));

        assert_ne!(first.client_id, second.client_id);
        assert!(first.name.starts_with("Guest-"));
        assert_eq!(first.name.len(), "Guest-".len() + 6);
        assert!(second.name.starts_with("Guest-"));
    }

    #[test]
    fn test_origin_rules() {
        let allowed = vec!["localhost:3000".to_string()];

        assert!(origin_allowed(&request(&[]), &allowed));
        assert!(origin_allowed(
            &request(&[("host", "chat.example.com"), ("origin", "https://chat.example.com")]),
            &allowed
        ));
        assert!(origin_allowed(
            &request(&[("host", "chat.example.com"), ("origin", "http://localhost:3000")]),
            &allowed
        ));
        assert!(!origin_allowed(
            &request(&[("host", "chat.example.com"), ("origin", "https://evil.example")]),
            &allowed
        ));
        assert!(!origin_allowed(&request(&[("origin", "not a url")]), &allowed));
    }

    #[test]
    fn test_handshake_checks_path() {
        let config = ServerConfig::default();
        let wrong_path = Request::builder().uri("/other").body(()).unwrap();

        let response = check_handshake(&wrong_path, &config).unwrap_err();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let forbidden = request(&[("host", "a.example"), ("origin", "https://b.example")]);
        let response = check_handshake(&forbidden, &config).unwrap_err();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        assert!(check_handshake(&request(&[("name", "Bob")]), &config).is_ok());
    }
}
