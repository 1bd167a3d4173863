//! WebSocket connections.
//!
//! Each connection runs one `select!` loop over three sources: frames from
//! the client, board events (commits, peers) and presence updates.

use crate::AppState;
use crate::board::BoardEvent;
use crate::presence::PresenceEvent;
use crate::registry::BoardEntry;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use inkboard_core::{BoardId, ClientMessage, Mutation, PresenceRecord, ServerMessage, SessionId};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A connection's place on a board.
struct Membership {
    board: BoardId,
    session: SessionId,
    entry: BoardEntry,
}

/// Per-connection state. The receivers are polled by the socket loop.
#[derive(Default)]
struct Connection {
    membership: Option<Membership>,
    events: Option<broadcast::Receiver<BoardEvent>>,
    presence: Option<broadcast::Receiver<PresenceEvent>>,
}

pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut conn = Connection::default();
    let conn_id = Uuid::new_v4();
    debug!("New connection: {}", conn_id);

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let replies = match ClientMessage::from_json(&text) {
                            Ok(client_msg) => conn.handle(&state, client_msg).await,
                            Err(e) => {
                                warn!("Invalid message on {}: {}", conn_id, e);
                                vec![ServerMessage::Error {
                                    message: format!("Invalid message: {}", e),
                                }]
                            }
                        };
                        if !send_all(&mut sender, &replies).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let err = ServerMessage::Error {
                            message: "Binary frames are not supported".to_string(),
                        };
                        if !send(&mut sender, &err).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Ignore ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error on {}: {}", conn_id, e);
                        break;
                    }
                }
            }

            event = next(&mut conn.events) => {
                match event {
                    Ok(BoardEvent { from, message }) => {
                        if from.is_some() && from == conn.session() {
                            continue;
                        }
                        if !send(&mut sender, &message).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Session {:?} missed {} board events, resyncing", conn.session(), missed);
                        if let Some(full) = conn.full_state().await {
                            if !send(&mut sender, &full).await {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Closed) => {
                        conn.events = None;
                        let err = ServerMessage::Error {
                            message: "Board closed".to_string(),
                        };
                        if !send(&mut sender, &err).await {
                            break;
                        }
                    }
                }
            }

            event = next(&mut conn.presence) => {
                match event {
                    Ok(PresenceEvent { from, message }) => {
                        if Some(from) == conn.session() {
                            continue;
                        }
                        if !send(&mut sender, &message).await {
                            break;
                        }
                    }
                    // Presence is lossy; the next update corrects it.
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => conn.presence = None,
                }
            }
        }
    }

    conn.leave(&state).await;
    debug!("Connection closed: {}", conn_id);
}

impl Connection {
    fn session(&self) -> Option<SessionId> {
        self.membership.as_ref().map(|m| m.session)
    }

    async fn handle(&mut self, state: &AppState, msg: ClientMessage) -> Vec<ServerMessage> {
        match msg {
            ClientMessage::Join { board, session } => self.join(state, board, session).await,
            ClientMessage::Leave => {
                self.leave(state).await;
                Vec::new()
            }
            ClientMessage::Submit { mutation } => self.submit(mutation).await.into_iter().collect(),
            ClientMessage::Presence { presence } => self.publish(presence).into_iter().collect(),
            ClientMessage::Resync { since } => {
                let Some(membership) = &self.membership else {
                    return vec![not_joined()];
                };
                match membership.entry.handle.resync(membership.session, since).await {
                    Ok(reply) => vec![reply],
                    Err(e) => vec![ServerMessage::Error { message: e.to_string() }],
                }
            }
        }
    }

    async fn join(&mut self, state: &AppState, board: BoardId, session: SessionId) -> Vec<ServerMessage> {
        self.leave(state).await;

        let (entry, grant) = match state.registry.join(&board, session).await {
            Ok(joined) => joined,
            Err(e) => {
                warn!("Session {} could not join {}: {}", session, board, e);
                return vec![ServerMessage::Error { message: e.to_string() }];
            }
        };

        let mut replies = vec![grant.joined];
        replies.extend(
            entry
                .presence
                .records()
                .into_iter()
                .filter(|(peer, _)| *peer != session)
                .map(|(peer, presence)| ServerMessage::Presence {
                    session: peer,
                    presence,
                }),
        );

        self.events = Some(grant.events);
        self.presence = Some(entry.presence.subscribe());
        info!("Session {} joined board {}", session, board);
        self.membership = Some(Membership {
            board,
            session,
            entry,
        });
        replies
    }

    async fn leave(&mut self, state: &AppState) {
        self.events = None;
        self.presence = None;
        if let Some(Membership {
            board,
            session,
            entry,
        }) = self.membership.take()
        {
            state.registry.leave(&board, session, &entry).await;
            info!("Session {} left board {}", session, board);
        }
    }

    async fn submit(&mut self, mutation: Mutation) -> Option<ServerMessage> {
        let Some(membership) = &self.membership else {
            return Some(not_joined());
        };
        if mutation.session != membership.session {
            return Some(ServerMessage::Invalid {
                local_seq: mutation.local_seq,
                message: "Mutation belongs to another session".to_string(),
            });
        }
        let local_seq = mutation.local_seq;
        match membership.entry.handle.submit(mutation).await {
            Ok(reply) => reply,
            Err(e) => Some(ServerMessage::Retry {
                local_seq,
                message: e.to_string(),
            }),
        }
    }

    fn publish(&mut self, presence: PresenceRecord) -> Option<ServerMessage> {
        let Some(membership) = &self.membership else {
            return Some(not_joined());
        };
        if !presence.is_valid() {
            return Some(ServerMessage::Error {
                message: "Invalid presence record".to_string(),
            });
        }
        membership.entry.presence.publish(membership.session, presence);
        None
    }

    async fn full_state(&self) -> Option<ServerMessage> {
        let membership = self.membership.as_ref()?;
        match membership.entry.handle.full_state(membership.session).await {
            Ok(full) => Some(full),
            Err(e) => Some(ServerMessage::Error { message: e.to_string() }),
        }
    }
}

fn not_joined() -> ServerMessage {
    ServerMessage::Error {
        message: "Join a board first".to_string(),
    }
}

/// Wait on an optional receiver; without one, never resolve.
async fn next<T: Clone>(rx: &mut Option<broadcast::Receiver<T>>) -> Result<T, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    match msg.to_json() {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to serialize {:?}: {}", msg, e);
            true
        }
    }
}

async fn send_all(sender: &mut SplitSink<WebSocket, Message>, msgs: &[ServerMessage]) -> bool {
    for msg in msgs {
        if !send(sender, msg).await {
            return false;
        }
    }
    true
}
