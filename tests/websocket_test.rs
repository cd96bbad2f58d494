//! End-to-end tests: real listener, real WebSocket clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chat_hub::{serve, ClientId, HubHandle, ServerConfig};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn start_hub() -> (SocketAddr, HubHandle) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = Arc::new(ServerConfig::default());
    let hub = HubHandle::start(config.command_buffer);

    tokio::spawn(serve(listener, hub.clone(), config));
    (addr, hub)
}

async fn connect(addr: SocketAddr, client_id: &str, name: &str) -> Ws {
    let mut request = format!("ws://{}/ws", addr).into_client_request().unwrap();
    let headers = request.headers_mut();
    headers.insert("client_id", HeaderValue::from_str(client_id).unwrap());
    headers.insert("name", HeaderValue::from_str(name).unwrap());

    let (ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    ws
}

async fn send(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn recv(ws: &mut Ws) -> Value {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_chat_session() {
    let (addr, _hub) = start_hub().await;

    let mut alice = connect(addr, "alice", "Alice").await;
    assert_eq!(recv(&mut alice).await, json!({"type": "hello", "message_id": 0, "rooms": []}));

    send(&mut alice, json!({"type": "create_new_room", "message_id": 1, "name": "general"})).await;
    assert_eq!(recv(&mut alice).await, json!({"type": "ok_message", "message_id": 1}));
    let created = recv(&mut alice).await;
    assert_eq!(created["type"], "new_room_created");
    assert_eq!(created["name"], "general");
    let room_id = created["id"].as_str().unwrap().to_string();

    let mut bob = connect(addr, "bob", "Bob").await;
    assert_eq!(
        recv(&mut bob).await,
        json!({"type": "hello", "message_id": 0, "rooms": [{"id": room_id, "name": "general"}]})
    );

    send(&mut bob, json!({"type": "join_room", "message_id": 2, "room_id": room_id})).await;
    assert_eq!(recv(&mut bob).await, json!({"type": "ok_message", "message_id": 2}));
    send(&mut alice, json!({"type": "join_room", "message_id": 3, "room_id": room_id})).await;
    assert_eq!(recv(&mut alice).await, json!({"type": "ok_message", "message_id": 3}));

    send(
        &mut alice,
        json!({"type": "send_message", "message_id": 4, "room_id": room_id, "content": "hi"}),
    )
    .await;
    let expected = json!({
        "type": "message_received",
        "message_id": 0,
        "room_id": room_id,
        "from": "alice",
        "from_name": "Alice",
        "msg": "hi",
    });
    assert_eq!(recv(&mut alice).await, expected);
    assert_eq!(recv(&mut alice).await, json!({"type": "ok_message", "message_id": 4}));
    assert_eq!(recv(&mut bob).await, expected);
}

#[tokio::test]
async fn test_request_errors_are_correlated() {
    let (addr, _hub) = start_hub().await;
    let mut carol = connect(addr, "carol", "Carol").await;
    recv(&mut carol).await;

    send(&mut carol, json!({"type": "join_room", "message_id": 7, "room_id": "nonexistent"})).await;
    assert_eq!(
        recv(&mut carol).await,
        json!({"type": "error_message", "message_id": 7, "error": "room_not_found"})
    );

    // Malformed body of a known type is ignored; the connection stays usable
    send(&mut carol, json!({"type": "leave_room", "message_id": 8})).await;
    send(&mut carol, json!({"type": "create_new_room", "message_id": 9, "name": "x"})).await;
    assert_eq!(recv(&mut carol).await, json!({"type": "ok_message", "message_id": 9}));
}

#[tokio::test]
async fn test_unknown_type_closes_connection() {
    let (addr, hub) = start_hub().await;
    let mut dave = connect(addr, "dave", "Dave").await;
    recv(&mut dave).await;

    send(&mut dave, json!({"type": "shout", "message_id": 1})).await;

    let close = loop {
        match timeout(WAIT, dave.next()).await.unwrap() {
            Some(Ok(Message::Close(frame))) => break frame,
            Some(Ok(_)) => continue,
            other => panic!("expected close frame, got {:?}", other),
        }
    };
    assert_eq!(close.map(|frame| frame.code), Some(CloseCode::Protocol));

    // The hub forgets the client shortly after
    let dave_id = ClientId::from("dave");
    timeout(WAIT, async {
        while hub.snapshot().await.unwrap().clients.contains_key(&dave_id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_wrong_path_is_rejected() {
    let (addr, _hub) = start_hub().await;

    let result = tokio_tungstenite::connect_async(format!("ws://{}/elsewhere", addr)).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_foreign_origin_is_refused() {
    let (addr, _hub) = start_hub().await;

    let mut request = format!("ws://{}/ws", addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("origin", HeaderValue::from_static("https://evil.example"));

    match tokio_tungstenite::connect_async(request).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::FORBIDDEN),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("handshake should have been refused"),
    }

    // The refusal is per connection; the server keeps accepting
    let mut erin = connect(addr, "erin", "Erin").await;
    assert_eq!(recv(&mut erin).await["type"], "hello");
}
