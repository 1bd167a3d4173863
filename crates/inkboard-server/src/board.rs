//! The board actor.
//!
//! Each active board runs one tokio task that owns its [`BoardCoordinator`].
//! Commands arrive over an `mpsc` channel and are handled one at a time, so
//! the board's sequence counter has a single writer. Commits and membership
//! changes fan out to every connection over a `broadcast` channel.

use crate::error::ServerError;
use inkboard_core::{
    BoardCoordinator, BoardId, BoardSnapshot, BoardStore, CommitError, CoordinatorConfig,
    Mutation, ServerMessage, SessionId, SubmitOutcome,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Store shared by every board of a server.
pub type SharedStore = Arc<dyn BoardStore>;

/// Held by a board's actor from load until its final checkpoint. An actor
/// started while an older one for the same board is still closing waits
/// here, so it never loads a log the older one is about to rewrite.
pub type BoardGate = Arc<Mutex<()>>;

/// A board-wide message. `from` is skipped when fanning out so a session
/// does not hear about its own arrival; commits carry `None` and reach
/// everyone, their author included.
#[derive(Debug, Clone)]
pub struct BoardEvent {
    pub from: Option<SessionId>,
    pub message: ServerMessage,
}

/// What a session gets back from joining.
pub struct JoinGrant {
    /// The `joined` message: snapshot, sequence and what was processed.
    pub joined: ServerMessage,
    /// Every commit after the snapshot in `joined`.
    pub events: broadcast::Receiver<BoardEvent>,
}

enum BoardCommand {
    Join {
        session: SessionId,
        reply: oneshot::Sender<JoinGrant>,
    },
    Leave {
        session: SessionId,
    },
    Submit {
        mutation: Mutation,
        reply: oneshot::Sender<Option<ServerMessage>>,
    },
    Resync {
        session: SessionId,
        since: Option<u64>,
        reply: oneshot::Sender<ServerMessage>,
    },
    Snapshot {
        reply: oneshot::Sender<(u64, BoardSnapshot)>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cheap handle to a running board actor.
#[derive(Clone)]
pub struct BoardHandle {
    board: BoardId,
    commands: mpsc::Sender<BoardCommand>,
}

impl BoardHandle {
    /// Start the actor for `board`. Its state loads in the background;
    /// commands sent meanwhile wait in the queue.
    pub fn spawn(
        board: BoardId,
        store: SharedStore,
        config: CoordinatorConfig,
        capacity: usize,
    ) -> Self {
        Self::spawn_gated(board, store, config, capacity, BoardGate::default())
    }

    /// Like [`BoardHandle::spawn`], but loading waits until `gate` is free.
    pub fn spawn_gated(
        board: BoardId,
        store: SharedStore,
        config: CoordinatorConfig,
        capacity: usize,
        gate: BoardGate,
    ) -> Self {
        let (commands, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(run(board.clone(), store, config, capacity.max(1), gate, rx));
        Self { board, commands }
    }

    pub fn board(&self) -> &BoardId {
        &self.board
    }

    /// Whether the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Register `session` and subscribe it to the board's commits.
    pub async fn join(&self, session: SessionId) -> Result<JoinGrant, ServerError> {
        self.request(|reply| BoardCommand::Join { session, reply })
            .await
    }

    pub async fn leave(&self, session: SessionId) -> Result<(), ServerError> {
        self.commands
            .send(BoardCommand::Leave { session })
            .await
            .map_err(|_| ServerError::BoardClosed(self.board.clone()))
    }

    /// Submit a mutation. Commits are delivered through the broadcast;
    /// the reply carries the author-only answer, if any.
    pub async fn submit(&self, mutation: Mutation) -> Result<Option<ServerMessage>, ServerError> {
        self.request(|reply| BoardCommand::Submit { mutation, reply })
            .await
    }

    /// Commits after `since`, or the full state when they are gone.
    pub async fn resync(&self, session: SessionId, since: u64) -> Result<ServerMessage, ServerError> {
        self.request(|reply| BoardCommand::Resync {
            session,
            since: Some(since),
            reply,
        })
        .await
    }

    /// The full state, for a session that fell behind the broadcast.
    pub async fn full_state(&self, session: SessionId) -> Result<ServerMessage, ServerError> {
        self.request(|reply| BoardCommand::Resync {
            session,
            since: None,
            reply,
        })
        .await
    }

    /// Current sequence and snapshot.
    pub async fn snapshot(&self) -> Result<(u64, BoardSnapshot), ServerError> {
        self.request(|reply| BoardCommand::Snapshot { reply }).await
    }

    /// Checkpoint and stop the actor.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        self.request(|reply| BoardCommand::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> BoardCommand,
    ) -> Result<T, ServerError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ServerError::BoardClosed(self.board.clone()))?;
        rx.await
            .map_err(|_| ServerError::BoardClosed(self.board.clone()))
    }
}

struct BoardActor {
    coordinator: BoardCoordinator<SharedStore>,
    events: broadcast::Sender<BoardEvent>,
    /// Connection count per session; one session may reconnect before its
    /// old socket is gone.
    members: BTreeMap<SessionId, usize>,
}

async fn run(
    board: BoardId,
    store: SharedStore,
    config: CoordinatorConfig,
    capacity: usize,
    gate: BoardGate,
    mut commands: mpsc::Receiver<BoardCommand>,
) {
    let lease = gate.lock_owned().await;
    let coordinator = match BoardCoordinator::load(board.clone(), store, config).await {
        Ok(coordinator) => coordinator,
        Err(e) => {
            error!("Failed to load board {}: {}", board, e);
            return;
        }
    };
    info!("Board {} loaded at sequence {}", board, coordinator.sequence());

    let (events, _) = broadcast::channel(capacity);
    let mut actor = BoardActor {
        coordinator,
        events,
        members: BTreeMap::new(),
    };

    let mut shutdown = None;
    while let Some(command) = commands.recv().await {
        match command {
            BoardCommand::Shutdown { reply } => {
                shutdown = Some(reply);
                break;
            }
            command => actor.handle(command).await,
        }
    }

    if let Err(e) = actor.coordinator.checkpoint().await {
        warn!("Final checkpoint of {} failed: {}", board, e);
    }
    drop(lease);
    if let Some(reply) = shutdown {
        let _ = reply.send(());
    }
    info!("Board {} closed at sequence {}", board, actor.coordinator.sequence());
}

impl BoardActor {
    async fn handle(&mut self, command: BoardCommand) {
        match command {
            BoardCommand::Join { session, reply } => {
                self.broadcast(Some(session), ServerMessage::PeerJoined { session });
                // Subscribing and taking the snapshot inside one command
                // means no commit can fall between the two.
                let events = self.events.subscribe();
                *self.members.entry(session).or_default() += 1;
                let joined = ServerMessage::Joined {
                    board: self.coordinator.board().clone(),
                    session,
                    sequence: self.coordinator.sequence(),
                    snapshot: self.coordinator.snapshot(),
                    processed: self.coordinator.processed_for(session),
                    peers: self.members.keys().copied().collect(),
                };
                let _ = reply.send(JoinGrant { joined, events });
                debug!("{} joined {}", session, self.coordinator.board());
            }
            BoardCommand::Leave { session } => {
                let Some(count) = self.members.get_mut(&session) else {
                    return;
                };
                *count -= 1;
                if *count == 0 {
                    self.members.remove(&session);
                    self.broadcast(Some(session), ServerMessage::PeerLeft { session });
                }
            }
            BoardCommand::Submit { mutation, reply } => {
                let answer = self.submit(mutation).await;
                let _ = reply.send(answer);
            }
            BoardCommand::Resync {
                session,
                since,
                reply,
            } => {
                let message = match since.and_then(|since| self.coordinator.catch_up(since)) {
                    Some(mutations) => ServerMessage::CatchUp { mutations },
                    None => ServerMessage::Resynced {
                        sequence: self.coordinator.sequence(),
                        snapshot: self.coordinator.snapshot(),
                        processed: self.coordinator.processed_for(session),
                    },
                };
                let _ = reply.send(message);
            }
            BoardCommand::Snapshot { reply } => {
                let _ = reply.send((self.coordinator.sequence(), self.coordinator.snapshot()));
            }
            // Handled by the run loop.
            BoardCommand::Shutdown { .. } => {}
        }
    }

    async fn submit(&mut self, mutation: Mutation) -> Option<ServerMessage> {
        let local_seq = mutation.local_seq;
        match self.coordinator.submit(mutation).await {
            Ok(SubmitOutcome::Committed(mutation)) => {
                self.broadcast(None, ServerMessage::Committed { mutation });
                None
            }
            Ok(SubmitOutcome::Duplicate) => None,
            Err(CommitError::Rejected(reason)) => Some(ServerMessage::Rejected { local_seq, reason }),
            Err(CommitError::Invalid(e)) => Some(ServerMessage::Invalid {
                local_seq,
                message: e.to_string(),
            }),
            Err(CommitError::Persistence(e)) => Some(ServerMessage::Retry {
                local_seq,
                message: e.to_string(),
            }),
        }
    }

    fn broadcast(&self, from: Option<SessionId>, message: ServerMessage) {
        let _ = self.events.send(BoardEvent { from, message });
    }
}
