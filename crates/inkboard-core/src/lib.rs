//! Inkboard Core Library
//!
//! Shared document model, undo history, presence and commit ordering for
//! collaborative Inkboard whiteboards.

pub mod config;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod history;
pub mod mutation;
pub mod patch;
pub mod presence;
pub mod protocol;
pub mod session;
pub mod shapes;
pub mod store;

pub use config::{CoordinatorConfig, SessionConfig};
pub use coordinator::{BoardCoordinator, SubmitOutcome};
pub use document::{BoardDocument, BoardSnapshot, DocumentStore, Prepared};
pub use error::{CommitError, Rejected, ValidationError};
pub use history::History;
pub use mutation::{BoardId, Mutation, Op, ProcessedSeqs, RemovedLayer, SessionId};
pub use patch::{FieldValue, LayerField, LayerPatch};
pub use presence::{PresenceRecord, PresenceTable, UserInfo};
pub use protocol::{ClientMessage, ServerMessage};
pub use session::{ClientSession, SyncEvent};
pub use shapes::{Layer, LayerId, LayerKind, LayerStyle, SerializableColor};
pub use store::{BoardStore, Checkpoint, FileBoardStore, LoadedBoard, MemoryBoardStore, StoreError};
