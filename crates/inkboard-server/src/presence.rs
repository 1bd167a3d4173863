//! Per-board presence fan-out.
//!
//! Presence never goes through the board actor. Records are replaced
//! wholesale, kept in a `DashMap` and pushed over a lossy broadcast channel:
//! a session that misses an update just sees the next one.

use dashmap::DashMap;
use inkboard_core::{PresenceRecord, ServerMessage, SessionId};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// A presence message and the session it came from.
#[derive(Debug, Clone)]
pub struct PresenceEvent {
    pub from: SessionId,
    pub message: ServerMessage,
}

struct Entry {
    record: PresenceRecord,
    updated: Instant,
}

/// Latest presence record of every session on one board.
pub struct PresenceBroadcaster {
    records: DashMap<SessionId, Entry>,
    tx: broadcast::Sender<PresenceEvent>,
}

impl PresenceBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            records: DashMap::new(),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.tx.subscribe()
    }

    /// Replace `session`'s record and broadcast it.
    pub fn publish(&self, session: SessionId, record: PresenceRecord) {
        self.records.insert(
            session,
            Entry {
                record: record.clone(),
                updated: Instant::now(),
            },
        );
        self.send(
            session,
            ServerMessage::Presence {
                session,
                presence: record,
            },
        );
    }

    /// Drop `session`'s record. Returns whether it had one.
    pub fn on_disconnect(&self, session: SessionId) -> bool {
        if self.records.remove(&session).is_none() {
            return false;
        }
        self.send(session, ServerMessage::PresenceCleared { session });
        true
    }

    /// Drop records older than `timeout`, returning their sessions.
    pub fn prune_stale(&self, timeout: Duration) -> Vec<SessionId> {
        self.prune_stale_at(Instant::now(), timeout)
    }

    fn prune_stale_at(&self, now: Instant, timeout: Duration) -> Vec<SessionId> {
        let stale: Vec<SessionId> = self
            .records
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.updated) > timeout)
            .map(|entry| *entry.key())
            .collect();
        // Re-checked under the shard lock; a fresh publish wins.
        let removed: Vec<SessionId> = stale
            .into_iter()
            .filter(|session| {
                self.records
                    .remove_if(session, |_, entry| now.saturating_duration_since(entry.updated) > timeout)
                    .is_some()
            })
            .collect();
        for session in &removed {
            self.send(*session, ServerMessage::PresenceCleared { session: *session });
        }
        removed
    }

    /// Current records, ordered by session id.
    pub fn records(&self) -> Vec<(SessionId, PresenceRecord)> {
        let mut records: Vec<(SessionId, PresenceRecord)> = self
            .records
            .iter()
            .map(|entry| (*entry.key(), entry.record.clone()))
            .collect();
        records.sort_by_key(|(session, _)| *session);
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn send(&self, from: SessionId, message: ServerMessage) {
        // No receivers just means nobody is listening right now.
        let _ = self.tx.send(PresenceEvent { from, message });
    }
}
