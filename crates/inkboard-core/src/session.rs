//! Client side of board synchronization.
//!
//! A [`ClientSession`] keeps one local document made of the confirmed state
//! plus every pending (submitted, unconfirmed) mutation applied on top.
//! Whenever the server reports an outcome, pending mutations are unwound
//! through their inverses, the outcome is applied to the confirmed state, and
//! the remaining pending mutations are replayed.
//!
//! Like the collaboration manager it grew out of, the session does no I/O:
//! feed it server messages with [`ClientSession::handle_message`] and send
//! whatever [`ClientSession::take_outgoing`] returns.

use crate::config::SessionConfig;
use crate::document::{BoardDocument, BoardSnapshot, Prepared};
use crate::error::{Rejected, ValidationError};
use crate::history::History;
use crate::mutation::{BoardId, Mutation, Op, ProcessedSeqs, SessionId};
use crate::patch::LayerPatch;
use crate::presence::{PresenceRecord, PresenceTable};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::shapes::{Layer, LayerId, SerializableColor};
use kurbo::Point;
use std::collections::{BTreeSet, VecDeque};

/// Something the caller may want to react to (repaint, toast, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Joined {
        board: BoardId,
        sequence: u64,
        peers: Vec<SessionId>,
    },
    PeerJoined { session: SessionId },
    PeerLeft { session: SessionId },
    /// A commit was applied. `own` is true for this session's mutations.
    Committed { sequence: u64, own: bool },
    /// One of our mutations was refused and rolled back.
    RolledBack { local_seq: u64, reason: String },
    /// One of our mutations was queued again after a persistence failure.
    Retrying { local_seq: u64 },
    /// Missed commits were applied, or the state was replaced wholesale.
    Resynced { sequence: u64 },
    PresenceChanged { session: SessionId },
    PresenceCleared { session: SessionId },
    Error { message: String },
}

#[derive(Debug, Clone)]
struct Pending {
    mutation: Mutation,
    /// Reverts the local application. `None` when the op no longer applies
    /// locally; the server will refuse it too.
    inverse: Option<Op>,
    /// Rolled back locally; still committed if the server accepts it.
    cancelled: bool,
}

/// One participant's view of a board.
pub struct ClientSession {
    session: SessionId,
    board: Option<BoardId>,
    joined: bool,
    document: BoardDocument,
    confirmed_seq: u64,
    next_local_seq: u64,
    pending: VecDeque<Pending>,
    history: History,
    presence: PresenceRecord,
    peers: BTreeSet<SessionId>,
    peer_presence: PresenceTable,
    resync_requested: bool,
    outgoing: Vec<String>,
    config: SessionConfig,
}

impl ClientSession {
    pub fn new(session: SessionId) -> Self {
        Self::with_config(session, SessionConfig::default())
    }

    pub fn with_config(session: SessionId, config: SessionConfig) -> Self {
        Self {
            session,
            board: None,
            joined: false,
            document: BoardDocument::new(),
            confirmed_seq: 0,
            next_local_seq: 1,
            pending: VecDeque::new(),
            history: History::new(config.history_depth),
            presence: PresenceRecord::default(),
            peers: BTreeSet::new(),
            peer_presence: PresenceTable::new(config.presence_timeout),
            resync_requested: false,
            outgoing: Vec::new(),
            config,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn board(&self) -> Option<&BoardId> {
        self.board.as_ref()
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    /// Local state: confirmed commits plus pending mutations.
    pub fn document(&self) -> &BoardDocument {
        &self.document
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        self.document.snapshot()
    }

    /// Global sequence of the last commit applied.
    pub fn confirmed_seq(&self) -> u64 {
        self.confirmed_seq
    }

    pub fn pending_len(&self) -> usize {
        self.pending.iter().filter(|p| !p.cancelled).count()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn peers(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.peers.iter().copied()
    }

    pub fn peer_presence(&self) -> &PresenceTable {
        &self.peer_presence
    }

    pub fn presence(&self) -> &PresenceRecord {
        &self.presence
    }

    // --- Board membership ---

    /// Request to join a board. Queues the join message.
    pub fn join(&mut self, board: BoardId) {
        self.board = Some(board.clone());
        self.joined = false;
        self.send(ClientMessage::Join {
            board,
            session: self.session,
        });
    }

    /// Leave the board. Undo history and peer presence are discarded.
    pub fn leave(&mut self) {
        if self.board.take().is_some() {
            self.send(ClientMessage::Leave);
        }
        self.joined = false;
        self.history.clear();
        self.peers.clear();
        self.peer_presence.clear();
    }

    /// The connection dropped. Pending mutations are kept and resubmitted
    /// on the next join; undo history does not survive the reconnect.
    pub fn disconnected(&mut self) {
        self.joined = false;
        self.history.clear();
        self.peers.clear();
        self.peer_presence.clear();
    }

    // --- Local edits ---

    /// Apply `op` optimistically, record it for undo and submit it.
    pub fn submit(&mut self, op: Op) -> Result<Mutation, ValidationError> {
        op.validate()?;
        if let Op::UpdateLayer { id, after, .. } = &op {
            if let Some(layer) = self.document.get(*id) {
                after.check_applicable(layer.kind())?;
            }
        }
        let prepared = self.document.apply(&op)?;
        let mutation = self.enqueue(op, &prepared);
        self.history
            .record(mutation.local_seq, prepared.op, prepared.inverse);
        Ok(mutation)
    }

    /// Add a layer on top of the paint order.
    pub fn insert_layer(&mut self, layer: Layer) -> Result<Mutation, ValidationError> {
        // Appending resolves against the server's order, not ours.
        self.submit(Op::insert(layer, usize::MAX))
    }

    pub fn delete_layer(&mut self, id: LayerId) -> Result<Mutation, ValidationError> {
        self.submit(Op::delete(id))
    }

    pub fn update_layer(&mut self, id: LayerId, patch: LayerPatch) -> Result<Mutation, ValidationError> {
        self.submit(Op::update(id, patch))
    }

    pub fn reorder_layer(&mut self, id: LayerId, to: usize) -> Result<Mutation, ValidationError> {
        let from = self
            .document
            .position(id)
            .ok_or(ValidationError::UnknownLayer(id))?;
        self.submit(Op::reorder(id, from, to))
    }

    /// Turn the current pencil draft into a path layer.
    pub fn commit_pencil_draft(&mut self) -> Result<Option<Mutation>, ValidationError> {
        let Some(path) = self.presence.draft_path(self.config.simplify_tolerance) else {
            return Ok(None);
        };
        self.presence.pencil_draft = None;
        self.queue_presence();
        self.insert_layer(path.into()).map(Some)
    }

    /// Revert this session's latest edit by submitting its inverse.
    ///
    /// Returns `Err` when the inverse no longer applies (for example the
    /// layer was deleted by someone else); the history entry is dropped.
    pub fn undo(&mut self) -> Result<Option<Mutation>, Rejected> {
        let Some(op) = self.history.undo() else {
            return Ok(None);
        };
        self.submit_moved(op).map(Some)
    }

    /// Re-apply the latest undone edit.
    pub fn redo(&mut self) -> Result<Option<Mutation>, Rejected> {
        let Some(op) = self.history.redo() else {
            return Ok(None);
        };
        self.submit_moved(op).map(Some)
    }

    fn submit_moved(&mut self, op: Op) -> Result<Mutation, Rejected> {
        match self.document.apply(&op) {
            Ok(prepared) => {
                let mutation = self.enqueue(prepared.op.clone(), &prepared);
                self.history.bind_moved(mutation.local_seq, &prepared);
                Ok(mutation)
            }
            Err(rejected) => {
                log::debug!("History entry no longer applies: {}", rejected);
                self.history.discard_moved();
                Err(rejected)
            }
        }
    }

    /// Roll a pending mutation back locally without telling the server.
    /// If the server commits it anyway, the commit is applied like any other.
    pub fn cancel(&mut self, local_seq: u64) -> bool {
        let Some(index) = self
            .pending
            .iter()
            .position(|p| p.mutation.local_seq == local_seq && !p.cancelled)
        else {
            return false;
        };
        self.unwind();
        self.pending[index].cancelled = true;
        self.history.invalidate(local_seq);
        self.replay();
        true
    }

    fn enqueue(&mut self, op: Op, prepared: &Prepared) -> Mutation {
        let local_seq = self.next_local_seq;
        self.next_local_seq += 1;
        let mutation = Mutation::new(self.session, local_seq, op);
        self.pending.push_back(Pending {
            mutation: mutation.clone(),
            inverse: Some(prepared.inverse.clone()),
            cancelled: false,
        });
        if self.joined {
            self.send(ClientMessage::Submit {
                mutation: mutation.clone(),
            });
        }
        mutation
    }

    // --- Presence ---

    pub fn set_cursor(&mut self, point: Point) {
        self.presence.cursor = Some(point);
        self.queue_presence();
    }

    pub fn clear_cursor(&mut self) {
        self.presence.cursor = None;
        self.queue_presence();
    }

    pub fn set_selection(&mut self, selection: impl IntoIterator<Item = LayerId>) {
        self.presence.selection = selection.into_iter().collect();
        self.queue_presence();
    }

    /// Select the topmost layer under `point`, or clear the selection when
    /// nothing is there.
    pub fn select_at(&mut self, point: Point, tolerance: f64) -> Option<LayerId> {
        let hit = self.document.hit_test(point, tolerance);
        self.set_selection(hit);
        hit
    }

    /// Extend the in-progress freehand stroke.
    pub fn extend_pencil_draft(&mut self, point: Point) {
        self.presence.pencil_draft.get_or_insert_with(Vec::new).push(point);
        self.queue_presence();
    }

    pub fn clear_pencil_draft(&mut self) {
        self.presence.pencil_draft = None;
        self.queue_presence();
    }

    pub fn set_pen_color(&mut self, color: Option<SerializableColor>) {
        self.presence.pen_color = color;
        self.queue_presence();
    }

    pub fn set_user_info(&mut self, name: impl Into<String>, color: SerializableColor) {
        self.presence = std::mem::take(&mut self.presence).with_user(name, color);
        self.queue_presence();
    }

    /// Drop remote presence that has not been refreshed recently.
    pub fn prune_stale_peers(&mut self) -> Vec<SessionId> {
        self.peer_presence.prune_stale()
    }

    fn queue_presence(&mut self) {
        if self.joined {
            self.send(ClientMessage::Presence {
                presence: self.presence.clone(),
            });
        }
    }

    // --- Outgoing queue ---

    /// Take pending outgoing messages (drains the queue).
    pub fn take_outgoing(&mut self) -> Vec<String> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    fn send(&mut self, msg: ClientMessage) {
        match msg.to_json() {
            Ok(json) => self.outgoing.push(json),
            Err(e) => log::warn!("Failed to encode client message: {}", e),
        }
    }

    // --- Incoming messages ---

    /// Handle an incoming server message.
    pub fn handle_message(&mut self, json: &str) -> Option<SyncEvent> {
        match ServerMessage::from_json(json) {
            Ok(msg) => self.handle(msg),
            Err(e) => {
                log::warn!("Ignoring malformed server message: {}", e);
                None
            }
        }
    }

    pub fn handle(&mut self, msg: ServerMessage) -> Option<SyncEvent> {
        match msg {
            ServerMessage::Joined {
                board,
                session,
                sequence,
                snapshot,
                processed,
                peers,
            } => {
                if session != self.session {
                    return None;
                }
                if let Err(e) = self.reset(snapshot, sequence, &processed) {
                    return Some(SyncEvent::Error {
                        message: format!("Invalid board state: {}", e),
                    });
                }
                self.board = Some(board.clone());
                self.joined = true;
                self.peers = peers.iter().copied().filter(|p| *p != self.session).collect();

                // Never-processed mutations are resubmitted under their
                // original sequence numbers, so redelivery stays harmless.
                self.pending.retain(|p| !p.cancelled);
                let resubmit: Vec<Mutation> =
                    self.pending.iter().map(|p| p.mutation.clone()).collect();
                for mutation in resubmit {
                    self.send(ClientMessage::Submit { mutation });
                }
                self.queue_presence();
                Some(SyncEvent::Joined {
                    board,
                    sequence,
                    peers: self.peers.iter().copied().collect(),
                })
            }
            ServerMessage::PeerJoined { session } => {
                self.peers.insert(session);
                Some(SyncEvent::PeerJoined { session })
            }
            ServerMessage::PeerLeft { session } => {
                self.peers.remove(&session);
                self.peer_presence.remove(session);
                Some(SyncEvent::PeerLeft { session })
            }
            ServerMessage::Committed { mutation } => self.apply_commit(mutation),
            ServerMessage::Rejected { local_seq, reason } => {
                self.roll_back(local_seq, reason.to_string())
            }
            ServerMessage::Invalid { local_seq, message } => self.roll_back(local_seq, message),
            ServerMessage::Retry { local_seq, message } => {
                log::debug!("Server asked to retry {}: {}", local_seq, message);
                let index = self
                    .pending
                    .iter()
                    .position(|p| p.mutation.local_seq == local_seq)?;
                if self.pending[index].cancelled {
                    self.pending.remove(index);
                    return None;
                }
                let mutation = self.pending[index].mutation.clone();
                self.send(ClientMessage::Submit { mutation });
                Some(SyncEvent::Retrying { local_seq })
            }
            ServerMessage::CatchUp { mutations } => {
                self.resync_requested = false;
                for mutation in mutations {
                    self.apply_commit(mutation);
                }
                Some(SyncEvent::Resynced {
                    sequence: self.confirmed_seq,
                })
            }
            ServerMessage::Resynced {
                sequence,
                snapshot,
                processed,
            } => {
                self.resync_requested = false;
                match self.reset(snapshot, sequence, &processed) {
                    Ok(()) => Some(SyncEvent::Resynced { sequence }),
                    Err(e) => Some(SyncEvent::Error {
                        message: format!("Invalid board state: {}", e),
                    }),
                }
            }
            ServerMessage::Presence { session, presence } => {
                if session == self.session {
                    return None;
                }
                self.peers.insert(session);
                self.peer_presence.update(session, presence);
                Some(SyncEvent::PresenceChanged { session })
            }
            ServerMessage::PresenceCleared { session } => {
                self.peer_presence.remove(session)?;
                Some(SyncEvent::PresenceCleared { session })
            }
            ServerMessage::Error { message } => Some(SyncEvent::Error { message }),
        }
    }

    fn apply_commit(&mut self, mutation: Mutation) -> Option<SyncEvent> {
        let Some(sequence) = mutation.global_seq else {
            log::warn!("Ignoring commit without a global sequence");
            return None;
        };
        if sequence <= self.confirmed_seq {
            return None;
        }
        if sequence > self.confirmed_seq + 1 {
            if !self.resync_requested {
                log::debug!(
                    "Missed commits {}..{}, requesting resync",
                    self.confirmed_seq + 1,
                    sequence
                );
                self.resync_requested = true;
                self.send(ClientMessage::Resync {
                    since: self.confirmed_seq,
                });
            }
            return None;
        }

        let own = mutation.session == self.session;
        self.unwind();
        match self.document.apply(&mutation.op) {
            Ok(prepared) => {
                if own {
                    self.pending
                        .retain(|p| p.mutation.local_seq != mutation.local_seq);
                    self.history.rebind(mutation.local_seq, &prepared);
                }
            }
            Err(e) => {
                // The confirmed state no longer matches the server's.
                log::error!("Commit {} does not apply locally: {}", sequence, e);
                self.replay();
                if let Some(board) = self.board.clone() {
                    self.joined = false;
                    self.send(ClientMessage::Join {
                        board,
                        session: self.session,
                    });
                }
                return Some(SyncEvent::Error {
                    message: format!("Diverged at commit {}, rejoining", sequence),
                });
            }
        }
        self.confirmed_seq = sequence;
        self.replay();
        Some(SyncEvent::Committed { sequence, own })
    }

    fn roll_back(&mut self, local_seq: u64, reason: String) -> Option<SyncEvent> {
        let index = self
            .pending
            .iter()
            .position(|p| p.mutation.local_seq == local_seq)?;
        self.unwind();
        self.pending.remove(index);
        self.history.invalidate(local_seq);
        self.replay();
        log::debug!("Rolled back {}: {}", local_seq, reason);
        Some(SyncEvent::RolledBack { local_seq, reason })
    }

    /// Replace local state with a server snapshot and replay what is left.
    fn reset(
        &mut self,
        snapshot: BoardSnapshot,
        sequence: u64,
        processed: &ProcessedSeqs,
    ) -> Result<(), ValidationError> {
        self.document = BoardDocument::from_snapshot(snapshot)?;
        self.confirmed_seq = sequence;
        self.resync_requested = false;
        let (settled, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| processed.contains(p.mutation.local_seq));
        self.pending = pending.into();
        // The server answered these while we were not listening. Undo of one
        // whose effect is not in the snapshot would misfire.
        for entry in settled {
            if !entry.cancelled && !self.reflects(&entry.mutation.op) {
                log::debug!(
                    "Pending {} was refused while away, dropping its history",
                    entry.mutation.local_seq
                );
                self.history.invalidate(entry.mutation.local_seq);
            }
        }
        self.next_local_seq = self.next_local_seq.max(processed.highest() + 1);
        self.replay();
        Ok(())
    }

    /// Whether the confirmed document shows the effect of `op`.
    fn reflects(&self, op: &Op) -> bool {
        match op {
            Op::InsertLayer { id, .. } | Op::Reorder { id, .. } => self.document.contains(*id),
            Op::DeleteLayer { id, .. } => !self.document.contains(*id),
            Op::UpdateLayer { id, after, .. } => self
                .document
                .get(*id)
                .is_some_and(|layer| layer.capture(after).as_ref() == Some(after)),
        }
    }

    /// Revert every locally applied pending mutation, newest first.
    fn unwind(&mut self) {
        for pending in self.pending.iter().rev() {
            if pending.cancelled {
                continue;
            }
            let Some(inverse) = &pending.inverse else {
                continue;
            };
            if let Err(e) = self.document.apply(inverse) {
                log::error!(
                    "Inverse of pending {} failed to apply: {}",
                    pending.mutation.local_seq,
                    e
                );
            }
        }
    }

    /// Re-apply pending mutations on top of the confirmed state.
    fn replay(&mut self) {
        for pending in self.pending.iter_mut() {
            if pending.cancelled {
                pending.inverse = None;
                continue;
            }
            match self.document.apply(&pending.mutation.op) {
                Ok(prepared) => {
                    self.history.rebind(pending.mutation.local_seq, &prepared);
                    pending.inverse = Some(prepared.inverse);
                }
                Err(_) => pending.inverse = None,
            }
        }
    }
}
