//! Active boards, keyed by id.

use crate::board::{BoardGate, BoardHandle, JoinGrant, SharedStore};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::presence::PresenceBroadcaster;
use dashmap::DashMap;
use inkboard_core::{BoardCoordinator, BoardId, BoardSnapshot, SessionId};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

/// One active board: its actor, its presence and how many connections
/// are on it.
#[derive(Clone)]
pub struct BoardEntry {
    pub handle: BoardHandle,
    pub presence: Arc<PresenceBroadcaster>,
    connections: Arc<AtomicUsize>,
}

impl BoardEntry {
    fn spawn(board: &BoardId, store: SharedStore, config: &ServerConfig, gate: BoardGate) -> Self {
        Self {
            handle: BoardHandle::spawn_gated(
                board.clone(),
                store,
                config.coordinator.clone(),
                config.channel_capacity,
                gate,
            ),
            presence: Arc::new(PresenceBroadcaster::new(config.channel_capacity)),
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Creates a board actor on first join and evicts it on last leave.
///
/// Connection counts only change under the map's shard lock, so a join
/// can never attach to an entry that is being evicted. A board rejoined
/// while its evicted actor is still checkpointing gets a new actor that
/// shares the old one's gate and loads only after that checkpoint.
pub struct BoardRegistry {
    boards: DashMap<BoardId, BoardEntry>,
    gates: DashMap<BoardId, BoardGate>,
    store: SharedStore,
    config: ServerConfig,
}

impl BoardRegistry {
    pub fn new(store: SharedStore, config: ServerConfig) -> Self {
        Self {
            boards: DashMap::new(),
            gates: DashMap::new(),
            store,
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Attach `session` to `board`, starting the board if needed.
    pub async fn join(
        &self,
        board: &BoardId,
        session: SessionId,
    ) -> Result<(BoardEntry, JoinGrant), ServerError> {
        if !board.is_valid() {
            return Err(ServerError::InvalidBoard(board.to_string()));
        }

        let entry = {
            let mut slot = self.boards.entry(board.clone()).or_insert_with(|| {
                info!("Starting board {}", board);
                BoardEntry::spawn(board, self.store.clone(), &self.config, self.gate(board))
            });
            if slot.handle.is_closed() {
                warn!("Replacing stopped board {}", board);
                let connections = slot.connections.clone();
                *slot = BoardEntry {
                    connections,
                    ..BoardEntry::spawn(board, self.store.clone(), &self.config, self.gate(board))
                };
            }
            slot.connections.fetch_add(1, Ordering::SeqCst);
            slot.clone()
        };

        match entry.handle.join(session).await {
            Ok(grant) => Ok((entry, grant)),
            Err(e) => {
                self.release(board, &entry).await;
                Err(e)
            }
        }
    }

    /// Detach `session` from `board`. The last connection out checkpoints
    /// and stops the board.
    pub async fn leave(&self, board: &BoardId, session: SessionId, entry: &BoardEntry) {
        entry.presence.on_disconnect(session);
        if let Err(e) = entry.handle.leave(session).await {
            warn!("Leaving {}: {}", board, e);
        }
        self.release(board, entry).await;
    }

    async fn release(&self, board: &BoardId, entry: &BoardEntry) {
        let evicted = self.boards.remove_if(board, |_, current| {
            Arc::ptr_eq(&current.connections, &entry.connections)
                && current.connections.fetch_sub(1, Ordering::SeqCst) == 1
        });
        if let Some((_, evicted)) = evicted {
            info!("Closing idle board {}", board);
            if let Err(e) = evicted.handle.shutdown().await {
                warn!("Closing {}: {}", board, e);
            }
            // Kept while a newer actor holds or waits on it.
            self.gates.remove_if(board, |_, gate| Arc::strong_count(gate) == 1);
        }
    }

    fn gate(&self, board: &BoardId) -> BoardGate {
        self.gates.entry(board.clone()).or_default().clone()
    }

    pub fn get(&self, board: &BoardId) -> Option<BoardEntry> {
        self.boards.get(board).map(|entry| entry.clone())
    }

    /// Ids of the active boards, sorted.
    pub fn active(&self) -> Vec<BoardId> {
        let mut boards: Vec<BoardId> = self.boards.iter().map(|e| e.key().clone()).collect();
        boards.sort();
        boards
    }

    pub fn len(&self) -> usize {
        self.boards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }

    /// Current state of a board, whether or not anyone is on it. Boards
    /// that were never written are not found.
    pub async fn snapshot(&self, board: &BoardId) -> Result<BoardSnapshot, ServerError> {
        if !board.is_valid() {
            return Err(ServerError::InvalidBoard(board.to_string()));
        }
        if let Some(entry) = self.get(board) {
            if let Ok((_, snapshot)) = entry.handle.snapshot().await {
                return Ok(snapshot);
            }
        }

        let coordinator = BoardCoordinator::load(
            board.clone(),
            self.store.clone(),
            self.config.coordinator.clone(),
        )
        .await?;
        if coordinator.sequence() == 0 && coordinator.snapshot().is_empty() {
            return Err(ServerError::BoardNotFound(board.clone()));
        }
        Ok(coordinator.snapshot())
    }

    /// Drop stale presence on every active board.
    pub fn prune_presence(&self) -> usize {
        let entries: Vec<BoardEntry> = self.boards.iter().map(|e| e.value().clone()).collect();
        entries
            .iter()
            .map(|entry| entry.presence.prune_stale(self.config.presence_timeout).len())
            .sum()
    }

    /// Checkpoint and stop every board.
    pub async fn shutdown_all(&self) {
        let boards = self.active();
        for board in boards {
            if let Some((_, entry)) = self.boards.remove(&board) {
                if let Err(e) = entry.handle.shutdown().await {
                    warn!("Closing {}: {}", board, e);
                }
            }
        }
        self.gates.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkboard_core::shapes::Rectangle;
    use inkboard_core::store::{BoxFuture, StoreResult};
    use inkboard_core::{
        BoardStore, Checkpoint, LoadedBoard, MemoryBoardStore, Mutation, Op, ServerMessage,
    };
    use kurbo::Point;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Memory store with a slow checkpoint that logs loads and checkpoints
    /// in the order they finish.
    #[derive(Default)]
    struct SlowCheckpointStore {
        inner: MemoryBoardStore,
        events: Mutex<Vec<&'static str>>,
    }

    impl SlowCheckpointStore {
        fn events(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().clone()
        }
    }

    impl BoardStore for SlowCheckpointStore {
        fn load_document(&self, board: &BoardId) -> BoxFuture<'_, StoreResult<LoadedBoard>> {
            self.events.lock().unwrap().push("load");
            self.inner.load_document(board)
        }

        fn persist_mutation(
            &self,
            board: &BoardId,
            mutation: &Mutation,
            sequence: u64,
        ) -> BoxFuture<'_, StoreResult<()>> {
            self.inner.persist_mutation(board, mutation, sequence)
        }

        fn save_checkpoint(
            &self,
            board: &BoardId,
            checkpoint: &Checkpoint,
        ) -> BoxFuture<'_, StoreResult<()>> {
            let saved = self.inner.save_checkpoint(board, checkpoint);
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                saved.await?;
                self.events.lock().unwrap().push("checkpoint");
                Ok(())
            })
        }

        fn delete(&self, board: &BoardId) -> BoxFuture<'_, StoreResult<()>> {
            self.inner.delete(board)
        }

        fn list(&self) -> BoxFuture<'_, StoreResult<Vec<BoardId>>> {
            self.inner.list()
        }
    }

    fn registry() -> (Arc<MemoryBoardStore>, BoardRegistry) {
        let store = Arc::new(MemoryBoardStore::new());
        (store.clone(), BoardRegistry::new(store, ServerConfig::default()))
    }

    #[tokio::test]
    async fn test_board_lives_while_anyone_is_on_it() {
        let (store, registry) = registry();
        let board = BoardId::new("team");
        let alice = SessionId::new();
        let bob = SessionId::new();

        let (alice_entry, _) = registry.join(&board, alice).await.unwrap();
        let (bob_entry, _) = registry.join(&board, bob).await.unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(alice_entry.connections(), 2);

        let rect = Rectangle::new(Point::new(0.0, 0.0), 5.0, 5.0);
        let mutation = Mutation::new(alice, 1, Op::insert(rect.into(), usize::MAX));
        assert_eq!(alice_entry.handle.submit(mutation).await.unwrap(), None);

        registry.leave(&board, alice, &alice_entry).await;
        assert_eq!(registry.active(), vec![board.clone()]);

        registry.leave(&board, bob, &bob_entry).await;
        assert!(registry.is_empty());

        // Evicted boards are flushed to a checkpoint.
        let loaded = store.load_document(&board).await.unwrap();
        assert_eq!(loaded.checkpoint.map(|c| c.sequence), Some(1));
    }

    #[tokio::test]
    async fn test_rejoin_after_eviction_sees_state() {
        let (_, registry) = registry();
        let board = BoardId::new("team");
        let alice = SessionId::new();

        let (entry, _) = registry.join(&board, alice).await.unwrap();
        let rect = Rectangle::new(Point::new(0.0, 0.0), 5.0, 5.0);
        entry
            .handle
            .submit(Mutation::new(alice, 1, Op::insert(rect.into(), 0)))
            .await
            .unwrap();
        registry.leave(&board, alice, &entry).await;

        let (_, grant) = registry.join(&board, alice).await.unwrap();
        let ServerMessage::Joined { sequence, snapshot, processed, .. } = grant.joined else {
            panic!("expected joined");
        };
        assert_eq!(sequence, 1);
        assert_eq!(snapshot.len(), 1);
        assert!(processed.contains(1));
    }

    #[tokio::test]
    async fn test_rejoin_during_eviction_waits_for_checkpoint() {
        let store = Arc::new(SlowCheckpointStore::default());
        let registry = BoardRegistry::new(store.clone(), ServerConfig::default());
        let board = BoardId::new("team");
        let (alice, bob) = (SessionId::new(), SessionId::new());

        let (entry, _) = registry.join(&board, alice).await.unwrap();
        let rect = Rectangle::new(Point::new(0.0, 0.0), 5.0, 5.0);
        entry
            .handle
            .submit(Mutation::new(alice, 1, Op::insert(rect.into(), 0)))
            .await
            .unwrap();

        let ((), rejoined) = tokio::join!(registry.leave(&board, alice, &entry), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            registry.join(&board, bob).await
        });
        let (bob_entry, grant) = rejoined.unwrap();
        assert_eq!(store.events(), vec!["load", "checkpoint", "load"]);
        assert!(matches!(grant.joined, ServerMessage::Joined { sequence: 1, .. }));

        let rect = Rectangle::new(Point::new(9.0, 9.0), 5.0, 5.0);
        bob_entry
            .handle
            .submit(Mutation::new(bob, 1, Op::insert(rect.into(), 1)))
            .await
            .unwrap();
        registry.leave(&board, bob, &bob_entry).await;
        assert!(registry.gates.is_empty());

        let reloaded = BoardCoordinator::load(board, store.clone(), Default::default())
            .await
            .unwrap();
        assert_eq!(reloaded.sequence(), 2);
        assert_eq!(reloaded.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_board_id_is_refused() {
        let (_, registry) = registry();
        let result = registry.join(&BoardId::new("no spaces"), SessionId::new()).await;
        assert!(matches!(result, Err(ServerError::InvalidBoard(_))));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_of_unknown_board() {
        let (_, registry) = registry();
        let result = registry.snapshot(&BoardId::new("ghost")).await;
        assert!(matches!(result, Err(ServerError::BoardNotFound(_))));
    }

    #[tokio::test]
    async fn test_leave_clears_presence() {
        let (_, registry) = registry();
        let board = BoardId::new("team");
        let alice = SessionId::new();
        let (entry, _) = registry.join(&board, alice).await.unwrap();
        let (_bob_entry, _) = registry.join(&board, SessionId::new()).await.unwrap();
        entry.presence.publish(alice, Default::default());
        assert_eq!(entry.presence.len(), 1);

        registry.leave(&board, alice, &entry).await;
        assert!(entry.presence.is_empty());
        assert_eq!(registry.prune_presence(), 0);
    }
}
