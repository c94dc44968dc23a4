//! End-to-end tests against a real server using a WebSocket client.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use chatroom_server::{HealthResponse, ServerConfig, ServerHandle};
use chatroom_store::{MemoryStore, MessageStore, SqliteMessageStore};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn boot_server(store: Arc<dyn MessageStore>) -> ServerHandle {
    let config = ServerConfig {
        addr: "127.0.0.1:0".into(),
        ..ServerConfig::default()
    };
    chatroom_server::start(config, store).await.unwrap()
}

async fn boot() -> ServerHandle {
    boot_server(Arc::new(MemoryStore::new())).await
}

/// A chat connection that splits coalesced frames back into messages.
struct Conn {
    ws: WsStream,
    pending: VecDeque<Value>,
}

impl Conn {
    async fn open(server: &ServerHandle, query: &str) -> Self {
        let url = format!("ws://{}/ws{query}", server.local_addr());
        let (ws, _) = connect_async(url).await.unwrap();
        Self {
            ws,
            pending: VecDeque::new(),
        }
    }

    async fn join(server: &ServerHandle, name: &str) -> Self {
        Self::open(server, &format!("?username={name}")).await
    }

    /// Next message as JSON, or `None` once the server has closed.
    async fn next_json(&mut self) -> Option<Value> {
        loop {
            if let Some(value) = self.pending.pop_front() {
                return Some(value);
            }
            let frame = timeout(TIMEOUT, self.ws.next())
                .await
                .expect("timeout waiting for message");
            match frame {
                Some(Ok(Message::Text(text))) => {
                    for line in text.as_str().split('\n') {
                        self.pending.push_back(serde_json::from_str(line).unwrap());
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
                Some(Ok(_)) => {}
            }
        }
    }

    async fn next_of_type(&mut self, kind: &str) -> Value {
        loop {
            let value = self.next_json().await.expect("connection closed");
            if value["type"] == kind {
                return value;
            }
        }
    }

    async fn send(&mut self, value: Value) {
        self.ws.send(Message::text(value.to_string())).await.unwrap();
    }
}

async fn health(server: &ServerHandle) -> HealthResponse {
    reqwest::get(format!("http://{}/health", server.local_addr()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn health_counts_registered_clients() {
    let server = boot().await;

    let resp = health(&server).await;
    assert_eq!(resp.status, "ok");
    assert_eq!(resp.connections, 0);

    let mut alice = Conn::join(&server, "alice").await;
    alice.next_of_type("user_list").await;
    assert_eq!(health(&server).await.connections, 1);

    server.shutdown();
}

#[tokio::test]
async fn chat_is_restamped_and_echoed() {
    let server = boot().await;
    let mut alice = Conn::join(&server, "alice").await;
    alice.next_of_type("user_list").await;
    let mut bob = Conn::join(&server, "bob").await;
    bob.next_of_type("user_list").await;

    bob.send(json!({
        "type": "join",
        "username": "mallory",
        "timestamp": "1999-01-01T00:00:00Z",
        "content": "hello"
    }))
    .await;

    for conn in [&mut alice, &mut bob] {
        let chat = conn.next_of_type("chat").await;
        assert_eq!(chat["username"], "bob");
        assert_eq!(chat["content"], "hello");
        assert_ne!(chat["timestamp"], "1999-01-01T00:00:00Z");
        assert!(chat.get("users").is_none());
        assert!(chat.get("error").is_none());
    }

    server.shutdown();
}

#[tokio::test]
async fn presence_updates_on_join_and_leave() {
    let server = boot().await;
    let mut alice = Conn::join(&server, "alice").await;
    assert_eq!(
        alice.next_of_type("user_list").await,
        json!({"type": "user_list", "users": ["alice"]})
    );

    let bob = Conn::join(&server, "bob").await;
    let join = alice.next_of_type("join").await;
    assert_eq!(join["username"], "bob");
    assert_eq!(join["content"], "bob joined the chat.");
    assert_eq!(alice.next_of_type("user_list").await["users"], json!(["alice", "bob"]));

    drop(bob);
    let leave = alice.next_of_type("leave").await;
    assert_eq!(leave["content"], "bob left the chat.");
    assert_eq!(alice.next_of_type("user_list").await["users"], json!(["alice"]));

    server.shutdown();
}

#[tokio::test]
async fn duplicate_username_gets_error_then_close() {
    let server = boot().await;
    let mut alice = Conn::join(&server, "alice").await;
    alice.next_of_type("user_list").await;

    let mut impostor = Conn::join(&server, "alice").await;
    let error = impostor.next_json().await.unwrap();
    assert_eq!(error["type"], "error");
    assert!(error["error"].as_str().unwrap().contains("alice"));
    assert!(impostor.next_json().await.is_none());

    assert_eq!(server.hub().roster().await, vec!["alice"]);
    server.shutdown();
}

#[tokio::test]
async fn missing_username_joins_as_guest() {
    let server = boot().await;
    let mut conn = Conn::open(&server, "").await;
    assert_eq!(conn.next_of_type("user_list").await["users"], json!(["guest"]));

    let mut blank = Conn::open(&server, "?username=%20").await;
    assert_eq!(blank.next_json().await.unwrap()["type"], "error");

    server.shutdown();
}

#[tokio::test]
async fn history_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chat.db");

    {
        let store = SqliteMessageStore::open(&path).unwrap();
        store.init().unwrap();
        let server = boot_server(Arc::new(store)).await;
        let mut alice = Conn::join(&server, "alice").await;
        alice.next_of_type("user_list").await;
        alice.send(json!({"content": "remember me"})).await;
        alice.next_of_type("chat").await;
        server.shutdown();
        server.wait().await;
    }

    let store = SqliteMessageStore::open(&path).unwrap();
    store.init().unwrap();
    let server = boot_server(Arc::new(store)).await;
    let mut bob = Conn::join(&server, "bob").await;

    let join = bob.next_json().await.unwrap();
    assert_eq!(join["type"], "join");
    assert_eq!(join["username"], "alice");
    let chat = bob.next_json().await.unwrap();
    assert_eq!(chat["type"], "chat");
    assert_eq!(chat["content"], "remember me");
    assert_eq!(bob.next_json().await.unwrap()["type"], "user_list");

    server.shutdown();
}

#[tokio::test]
async fn malformed_message_keeps_connection() {
    let server = boot().await;
    let mut alice = Conn::join(&server, "alice").await;
    alice.next_of_type("user_list").await;

    alice.ws.send(Message::text("this is not json")).await.unwrap();
    alice.send(json!({"content": "after garbage"})).await;

    let chat = alice.next_of_type("chat").await;
    assert_eq!(chat["content"], "after garbage");

    server.shutdown();
}

#[tokio::test]
async fn oversized_message_disconnects_sender() {
    let server = boot().await;
    let mut alice = Conn::join(&server, "alice").await;
    alice.next_of_type("user_list").await;
    let mut bob = Conn::join(&server, "bob").await;
    bob.next_of_type("user_list").await;

    let _ = alice
        .ws
        .send(Message::text(json!({"content": "x".repeat(4096)}).to_string()))
        .await;

    let leave = bob.next_of_type("leave").await;
    assert_eq!(leave["username"], "alice");
    assert_eq!(server.hub().roster().await, vec!["bob"]);

    server.shutdown();
}

#[tokio::test]
async fn shutdown_closes_connections() {
    let server = boot().await;
    let mut alice = Conn::join(&server, "alice").await;
    alice.next_of_type("user_list").await;

    server.shutdown();
    while alice.next_json().await.is_some() {}
    timeout(TIMEOUT, server.wait()).await.unwrap();
}
