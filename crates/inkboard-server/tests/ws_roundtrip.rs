//! End-to-end tests against a server bound to a local port.

use futures_util::{SinkExt, StreamExt};
use inkboard_core::shapes::Rectangle;
use inkboard_core::{BoardId, ClientSession, MemoryBoardStore, SessionId, SyncEvent};
use inkboard_server::config::ServerConfig;
use inkboard_server::{AppState, router};
use kurbo::Point;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> SocketAddr {
    let state = AppState::new(ServerConfig::default(), Arc::new(MemoryBoardStore::new()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    addr
}

/// A client session wired to a real socket.
struct Client {
    ws: Socket,
    session: ClientSession,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let (ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
        Self {
            ws,
            session: ClientSession::new(SessionId::new()),
        }
    }

    async fn flush(&mut self) {
        for json in self.session.take_outgoing() {
            self.ws.send(Message::text(json)).await.unwrap();
        }
    }

    /// Feed server messages into the session until `pred` accepts an event.
    async fn wait_for(&mut self, pred: impl Fn(&SyncEvent) -> bool) -> SyncEvent {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let msg = tokio::time::timeout_at(deadline, self.ws.next())
                .await
                .expect("timed out waiting for event")
                .expect("socket closed")
                .unwrap();
            let Message::Text(text) = msg else {
                continue;
            };
            let event = self.session.handle_message(text.as_str());
            // Replies such as resubmits or resync requests go straight out.
            self.flush().await;
            if let Some(event) = event {
                if pred(&event) {
                    return event;
                }
            }
        }
    }

    /// Feed server messages into the session until its state satisfies `pred`.
    async fn wait_until(&mut self, pred: impl Fn(&ClientSession) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !pred(&self.session) {
            let msg = tokio::time::timeout_at(deadline, self.ws.next())
                .await
                .expect("timed out waiting for state")
                .expect("socket closed")
                .unwrap();
            if let Message::Text(text) = msg {
                self.session.handle_message(text.as_str());
                self.flush().await;
            }
        }
    }

    async fn join(&mut self, board: &str) {
        self.session.join(BoardId::new(board));
        self.flush().await;
        self.wait_for(|e| matches!(e, SyncEvent::Joined { .. })).await;
    }
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", path, addr);
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

#[tokio::test]
async fn test_commit_reaches_every_session() {
    let addr = start_server().await;
    let mut alice = Client::connect(addr).await;
    let mut bob = Client::connect(addr).await;

    alice.join("team").await;
    bob.join("team").await;
    let bob_id = bob.session.session();
    alice
        .wait_for(|e| matches!(e, SyncEvent::PeerJoined { session } if *session == bob_id))
        .await;

    let rect = Rectangle::new(Point::new(10.0, 10.0), 40.0, 30.0);
    alice.session.insert_layer(rect.into()).unwrap();
    alice.flush().await;

    alice
        .wait_for(|e| matches!(e, SyncEvent::Committed { sequence: 1, own: true }))
        .await;
    bob.wait_for(|e| matches!(e, SyncEvent::Committed { sequence: 1, own: false }))
        .await;

    assert_eq!(alice.session.pending_len(), 0);
    assert_eq!(bob.session.confirmed_seq(), 1);
    assert_eq!(alice.session.snapshot(), bob.session.snapshot());
    assert_eq!(bob.session.snapshot().len(), 1);
}

#[tokio::test]
async fn test_late_joiner_gets_current_state() {
    let addr = start_server().await;
    let mut alice = Client::connect(addr).await;
    alice.join("late").await;

    for i in 0..3 {
        let rect = Rectangle::new(Point::new(i as f64 * 20.0, 0.0), 10.0, 10.0);
        alice.session.insert_layer(rect.into()).unwrap();
    }
    alice.flush().await;
    alice
        .wait_for(|e| matches!(e, SyncEvent::Committed { sequence: 3, .. }))
        .await;

    let mut carol = Client::connect(addr).await;
    carol.join("late").await;
    assert_eq!(carol.session.confirmed_seq(), 3);
    assert_eq!(carol.session.snapshot(), alice.session.snapshot());
}

#[tokio::test]
async fn test_presence_flows_between_sessions() {
    let addr = start_server().await;
    let mut alice = Client::connect(addr).await;
    let mut bob = Client::connect(addr).await;
    alice.join("cursors").await;
    bob.join("cursors").await;

    let bob_id = bob.session.session();
    bob.session.set_cursor(Point::new(42.0, 24.0));
    bob.flush().await;

    // Bob's join-time presence may arrive first.
    alice
        .wait_until(|session| {
            session
                .peer_presence()
                .get(bob_id)
                .is_some_and(|p| p.cursor == Some(Point::new(42.0, 24.0)))
        })
        .await;

    bob.session.leave();
    bob.flush().await;
    alice
        .wait_for(|e| matches!(e, SyncEvent::PeerLeft { session } if *session == bob_id))
        .await;
    assert!(alice.session.peer_presence().get(bob_id).is_none());
}

#[tokio::test]
async fn test_malformed_message_gets_error() {
    let addr = start_server().await;
    let mut client = Client::connect(addr).await;
    client.ws.send(Message::text("{\"type\":\"bogus\"}")).await.unwrap();
    client
        .wait_for(|e| matches!(e, SyncEvent::Error { message } if message.contains("Invalid message")))
        .await;
}

#[tokio::test]
async fn test_export_over_http() {
    let addr = start_server().await;
    let mut alice = Client::connect(addr).await;
    alice.join("exported").await;
    let rect = Rectangle::new(Point::new(0.0, 0.0), 50.0, 50.0);
    alice.session.insert_layer(rect.into()).unwrap();
    alice.flush().await;
    alice
        .wait_for(|e| matches!(e, SyncEvent::Committed { sequence: 1, .. }))
        .await;

    let svg = http_get(addr, "/boards/exported/export/svg").await;
    assert!(svg.starts_with("HTTP/1.1 200"), "{}", svg);
    assert!(svg.contains("image/svg+xml"));
    assert!(svg.contains("<svg"));

    let missing = http_get(addr, "/boards/nobody-here/export/svg").await;
    assert!(missing.starts_with("HTTP/1.1 404"), "{}", missing);

    let bad_format = http_get(addr, "/boards/exported/export/gif").await;
    assert!(bad_format.starts_with("HTTP/1.1 400"), "{}", bad_format);

    let health = http_get(addr, "/health").await;
    assert!(health.ends_with("ok"));
}
