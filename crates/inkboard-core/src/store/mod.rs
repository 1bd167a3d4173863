//! Durable storage for board checkpoints and committed mutation logs.

mod file;
mod memory;

pub use file::FileBoardStore;
pub use memory::MemoryBoardStore;

use crate::document::BoardSnapshot;
use crate::mutation::{BoardId, Mutation, ProcessedSeqs, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Board not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Storage error: {0}")]
    Other(String),
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Boxed future returned by store operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A compacted board state at a given sequence number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub snapshot: BoardSnapshot,
    /// Global sequence of the last mutation folded into `snapshot`.
    pub sequence: u64,
    /// Per-session record of committed sequence numbers, for redelivery
    /// detection across restarts.
    #[serde(default)]
    pub processed: BTreeMap<SessionId, ProcessedSeqs>,
}

/// Everything needed to rebuild a board: the latest checkpoint and the
/// mutations committed after it, in sequence order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedBoard {
    pub checkpoint: Option<Checkpoint>,
    pub log: Vec<Mutation>,
}

impl LoadedBoard {
    /// Sequence number of the last durable mutation.
    pub fn last_sequence(&self) -> u64 {
        self.log
            .last()
            .and_then(|m| m.global_seq)
            .or_else(|| self.checkpoint.as_ref().map(|c| c.sequence))
            .unwrap_or(0)
    }
}

/// Trait for board storage backends.
///
/// Implementations must be `Send + Sync`; one store serves every board of a
/// server.
pub trait BoardStore: Send + Sync {
    /// Load a board. Unknown boards load as empty.
    fn load_document(&self, board: &BoardId) -> BoxFuture<'_, StoreResult<LoadedBoard>>;

    /// Durably append one committed mutation.
    fn persist_mutation(
        &self,
        board: &BoardId,
        mutation: &Mutation,
        sequence: u64,
    ) -> BoxFuture<'_, StoreResult<()>>;

    /// Replace the board's checkpoint and drop log entries it covers.
    fn save_checkpoint(
        &self,
        board: &BoardId,
        checkpoint: &Checkpoint,
    ) -> BoxFuture<'_, StoreResult<()>>;

    /// Delete a board.
    fn delete(&self, board: &BoardId) -> BoxFuture<'_, StoreResult<()>>;

    /// List all board ids.
    fn list(&self) -> BoxFuture<'_, StoreResult<Vec<BoardId>>>;
}

impl<S: BoardStore + ?Sized> BoardStore for std::sync::Arc<S> {
    fn load_document(&self, board: &BoardId) -> BoxFuture<'_, StoreResult<LoadedBoard>> {
        (**self).load_document(board)
    }

    fn persist_mutation(
        &self,
        board: &BoardId,
        mutation: &Mutation,
        sequence: u64,
    ) -> BoxFuture<'_, StoreResult<()>> {
        (**self).persist_mutation(board, mutation, sequence)
    }

    fn save_checkpoint(
        &self,
        board: &BoardId,
        checkpoint: &Checkpoint,
    ) -> BoxFuture<'_, StoreResult<()>> {
        (**self).save_checkpoint(board, checkpoint)
    }

    fn delete(&self, board: &BoardId) -> BoxFuture<'_, StoreResult<()>> {
        (**self).delete(board)
    }

    fn list(&self) -> BoxFuture<'_, StoreResult<Vec<BoardId>>> {
        (**self).list()
    }
}

/// Simple blocking executor for tests.
#[cfg(test)]
pub(crate) fn block_on<F: Future>(f: F) -> F::Output {
    use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

    fn dummy_raw_waker() -> RawWaker {
        fn no_op(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            dummy_raw_waker()
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
        RawWaker::new(std::ptr::null(), &VTABLE)
    }

    let waker = unsafe { Waker::from_raw(dummy_raw_waker()) };
    let mut cx = Context::from_waker(&waker);
    let mut f = std::pin::pin!(f);

    loop {
        if let Poll::Ready(result) = f.as_mut().poll(&mut cx) {
            return result;
        }
    }
}
