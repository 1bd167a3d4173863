//! In-memory board store.

use super::{BoardStore, BoxFuture, Checkpoint, LoadedBoard, StoreError, StoreResult};
use crate::mutation::{BoardId, Mutation};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
struct StoredBoard {
    checkpoint: Option<Checkpoint>,
    log: Vec<Mutation>,
}

/// In-memory store for tests and ephemeral servers.
#[derive(Debug, Default)]
pub struct MemoryBoardStore {
    boards: RwLock<HashMap<BoardId, StoredBoard>>,
}

impl MemoryBoardStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of log entries not yet folded into a checkpoint.
    pub fn log_len(&self, board: &BoardId) -> usize {
        self.boards
            .read()
            .map(|boards| boards.get(board).map_or(0, |b| b.log.len()))
            .unwrap_or(0)
    }
}

fn lock_error(e: impl std::fmt::Display) -> StoreError {
    StoreError::Other(format!("Lock error: {}", e))
}

impl BoardStore for MemoryBoardStore {
    fn load_document(&self, board: &BoardId) -> BoxFuture<'_, StoreResult<LoadedBoard>> {
        let board = board.clone();
        Box::pin(async move {
            let boards = self.boards.read().map_err(lock_error)?;
            Ok(boards
                .get(&board)
                .map(|stored| LoadedBoard {
                    checkpoint: stored.checkpoint.clone(),
                    log: stored.log.clone(),
                })
                .unwrap_or_default())
        })
    }

    fn persist_mutation(
        &self,
        board: &BoardId,
        mutation: &Mutation,
        sequence: u64,
    ) -> BoxFuture<'_, StoreResult<()>> {
        let board = board.clone();
        let mut mutation = mutation.clone();
        mutation.global_seq = Some(sequence);
        Box::pin(async move {
            let mut boards = self.boards.write().map_err(lock_error)?;
            boards.entry(board).or_default().log.push(mutation);
            Ok(())
        })
    }

    fn save_checkpoint(
        &self,
        board: &BoardId,
        checkpoint: &Checkpoint,
    ) -> BoxFuture<'_, StoreResult<()>> {
        let board = board.clone();
        let checkpoint = checkpoint.clone();
        Box::pin(async move {
            let mut boards = self.boards.write().map_err(lock_error)?;
            let stored = boards.entry(board).or_default();
            stored
                .log
                .retain(|m| m.global_seq.is_some_and(|seq| seq > checkpoint.sequence));
            stored.checkpoint = Some(checkpoint);
            Ok(())
        })
    }

    fn delete(&self, board: &BoardId) -> BoxFuture<'_, StoreResult<()>> {
        let board = board.clone();
        Box::pin(async move {
            let mut boards = self.boards.write().map_err(lock_error)?;
            boards
                .remove(&board)
                .map(|_| ())
                .ok_or_else(|| StoreError::NotFound(board.to_string()))
        })
    }

    fn list(&self) -> BoxFuture<'_, StoreResult<Vec<BoardId>>> {
        Box::pin(async move {
            let boards = self.boards.read().map_err(lock_error)?;
            let mut ids: Vec<BoardId> = boards.keys().cloned().collect();
            ids.sort();
            Ok(ids)
        })
    }
}
