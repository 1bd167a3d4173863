//! JSON messages exchanged between sessions and the board server.

use crate::document::BoardSnapshot;
use crate::error::Rejected;
use crate::mutation::{BoardId, Mutation, ProcessedSeqs, SessionId};
use crate::presence::PresenceRecord;
use serde::{Deserialize, Serialize};

/// Messages sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a board. `session` is the id granted by the identity layer.
    Join { board: BoardId, session: SessionId },
    /// Leave the current board.
    Leave,
    /// Submit a mutation for commit.
    Submit { mutation: Mutation },
    /// Replace this session's presence record.
    Presence { presence: PresenceRecord },
    /// Ask for every commit after `since`.
    Resync { since: u64 },
}

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirm board join with the current state.
    Joined {
        board: BoardId,
        session: SessionId,
        sequence: u64,
        snapshot: BoardSnapshot,
        /// What the board already processed from this session.
        processed: ProcessedSeqs,
        peers: Vec<SessionId>,
    },
    PeerJoined { session: SessionId },
    PeerLeft { session: SessionId },
    /// A commit, sent to every session including its author.
    Committed { mutation: Mutation },
    /// The author's mutation was refused; roll it back.
    Rejected { local_seq: u64, reason: Rejected },
    /// The author's mutation was malformed; roll it back.
    Invalid { local_seq: u64, message: String },
    /// The mutation could not be recorded durably; submit it again.
    Retry { local_seq: u64, message: String },
    /// Commits after the requested sequence.
    CatchUp { mutations: Vec<Mutation> },
    /// Full state, when the commits asked for are no longer available.
    Resynced {
        sequence: u64,
        snapshot: BoardSnapshot,
        processed: ProcessedSeqs,
    },
    Presence {
        session: SessionId,
        presence: PresenceRecord,
    },
    PresenceCleared { session: SessionId },
    Error { message: String },
}

impl ClientMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl ServerMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
