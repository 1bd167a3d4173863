//! The per-board commit authority.
//!
//! A [`BoardCoordinator`] owns the board's document and its sequence counter.
//! Every submitted mutation is checked, resolved against the current
//! document, given the next sequence number, persisted, and only then
//! applied. The resulting order is the single order every session replays.

use crate::config::CoordinatorConfig;
use crate::document::{BoardDocument, BoardSnapshot, DocumentStore};
use crate::error::CommitError;
use crate::mutation::{BoardId, Mutation, ProcessedSeqs, SessionId};
use crate::shapes::{Layer, LayerId};
use crate::store::{BoardStore, Checkpoint, StoreError};
use std::collections::{BTreeMap, VecDeque};

/// Result of a submission that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Sequenced and durably recorded; broadcast this to every session.
    Committed(Mutation),
    /// The `(session, local_seq)` pair was already processed. Dropped.
    Duplicate,
}

/// Commit authority for one board.
pub struct BoardCoordinator<S: BoardStore> {
    board: BoardId,
    store: S,
    document: DocumentStore,
    sequence: u64,
    processed: BTreeMap<SessionId, ProcessedSeqs>,
    /// Sequence at which each session in `processed` last submitted.
    last_active: BTreeMap<SessionId, u64>,
    recent: VecDeque<Mutation>,
    commits_since_checkpoint: u64,
    config: CoordinatorConfig,
}

impl<S: BoardStore> BoardCoordinator<S> {
    /// Rebuild a board from its latest checkpoint plus the log tail.
    pub async fn load(board: BoardId, store: S, config: CoordinatorConfig) -> Result<Self, StoreError> {
        let loaded = store.load_document(&board).await?;
        let (mut document, mut sequence, mut processed) = match loaded.checkpoint {
            Some(checkpoint) => {
                let document = BoardDocument::from_snapshot(checkpoint.snapshot).map_err(|e| {
                    StoreError::Serialization(format!("Corrupt checkpoint for {}: {}", board, e))
                })?;
                (document, checkpoint.sequence, checkpoint.processed)
            }
            None => (BoardDocument::new(), 0, BTreeMap::new()),
        };
        let mut last_active: BTreeMap<SessionId, u64> =
            processed.keys().map(|session| (*session, sequence)).collect();

        // A write that failed after reaching the store leaves an entry that
        // was never committed; the commit that reused its sequence number
        // was written later and wins.
        let mut entries: BTreeMap<u64, Mutation> = BTreeMap::new();
        for mutation in loaded.log {
            let Some(seq) = mutation.global_seq else {
                continue;
            };
            if let Some(replaced) = entries.insert(seq, mutation) {
                log::warn!(
                    "Log for {} has more than one entry at {}, dropping {}:{}",
                    board,
                    seq,
                    replaced.session,
                    replaced.local_seq
                );
            }
        }

        let mut recent = VecDeque::new();
        for (seq, mutation) in entries {
            if seq <= sequence {
                continue;
            }
            if seq != sequence + 1 {
                return Err(StoreError::Other(format!(
                    "Gap in log for {}: expected {}, found {}",
                    board,
                    sequence + 1,
                    seq
                )));
            }
            document.apply(&mutation.op).map_err(|e| {
                StoreError::Other(format!("Log entry {} for {} does not replay: {}", seq, board, e))
            })?;
            sequence = seq;
            processed
                .entry(mutation.session)
                .or_default()
                .insert(mutation.local_seq);
            last_active.insert(mutation.session, seq);
            recent.push_back(mutation);
            while recent.len() > config.recent_log_capacity {
                recent.pop_front();
            }
        }

        log::info!(
            "Loaded board {} at sequence {} with {} layers",
            board,
            sequence,
            document.len()
        );
        Ok(Self {
            board,
            store,
            document: DocumentStore::new(document),
            sequence,
            processed,
            last_active,
            recent,
            commits_since_checkpoint: 0,
            config,
        })
    }

    pub fn board(&self) -> &BoardId {
        &self.board
    }

    /// Sequence number of the last commit.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        self.document.snapshot()
    }

    pub fn get(&self, id: LayerId) -> Option<Layer> {
        self.document.get(id)
    }

    pub fn document(&self) -> &DocumentStore {
        &self.document
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn processed(&self) -> &BTreeMap<SessionId, ProcessedSeqs> {
        &self.processed
    }

    /// What this board has processed from `session`.
    pub fn processed_for(&self, session: SessionId) -> ProcessedSeqs {
        self.processed.get(&session).cloned().unwrap_or_default()
    }

    /// Validate, sequence, persist and apply one mutation.
    ///
    /// Invalid and rejected mutations are marked processed so a redelivered
    /// copy cannot commit after the sender rolled it back. A persistence
    /// failure changes nothing, so a retry of the same pair is accepted.
    pub async fn submit(&mut self, mutation: Mutation) -> Result<SubmitOutcome, CommitError> {
        let (session, local_seq) = mutation.key();
        if self
            .processed
            .get(&session)
            .is_some_and(|seen| seen.contains(local_seq))
        {
            log::debug!("Dropping duplicate {}:{} on {}", session, local_seq, self.board);
            return Ok(SubmitOutcome::Duplicate);
        }

        if let Err(e) = mutation.validate() {
            self.mark_processed(session, local_seq);
            return Err(e.into());
        }

        let prepared = match self.document.prepare(&mutation.op) {
            Ok(prepared) => prepared,
            Err(rejected) => {
                log::debug!(
                    "Rejected {} {}:{} on {}: {}",
                    mutation.op.name(),
                    session,
                    local_seq,
                    self.board,
                    rejected
                );
                self.mark_processed(session, local_seq);
                return Err(rejected.into());
            }
        };

        let sequence = self.sequence + 1;
        let committed = Mutation {
            session,
            local_seq,
            global_seq: Some(sequence),
            op: prepared.op.clone(),
        };

        if let Err(e) = self
            .store
            .persist_mutation(&self.board, &committed, sequence)
            .await
        {
            log::warn!(
                "Failed to persist {}:{} on {} at {}: {}",
                session,
                local_seq,
                self.board,
                sequence,
                e
            );
            return Err(CommitError::Persistence(e));
        }

        self.document.execute(&prepared);
        self.sequence = sequence;
        self.mark_processed(session, local_seq);
        self.recent.push_back(committed.clone());
        while self.recent.len() > self.config.recent_log_capacity {
            self.recent.pop_front();
        }

        self.commits_since_checkpoint += 1;
        if self.config.checkpoint_interval > 0
            && self.commits_since_checkpoint >= self.config.checkpoint_interval
        {
            // The commit is already durable in the log; a failed checkpoint
            // only delays compaction.
            if let Err(e) = self.checkpoint().await {
                log::warn!("Checkpoint of {} failed: {}", self.board, e);
            }
        }

        Ok(SubmitOutcome::Committed(committed))
    }

    /// Commits after `since`, if the recent log still covers them.
    pub fn catch_up(&self, since: u64) -> Option<Vec<Mutation>> {
        if since > self.sequence {
            return None;
        }
        if since == self.sequence {
            return Some(Vec::new());
        }
        let oldest = self.recent.front().and_then(|m| m.global_seq)?;
        if oldest > since + 1 {
            return None;
        }
        Some(
            self.recent
                .iter()
                .filter(|m| m.global_seq.is_some_and(|seq| seq > since))
                .cloned()
                .collect(),
        )
    }

    /// Write a compacted checkpoint of the current state, first dropping
    /// the processed pairs of long-idle sessions.
    pub async fn checkpoint(&mut self) -> Result<(), StoreError> {
        self.forget_idle_sessions();
        let checkpoint = Checkpoint {
            snapshot: self.document.snapshot(),
            sequence: self.sequence,
            processed: self.processed.clone(),
        };
        self.store.save_checkpoint(&self.board, &checkpoint).await?;
        self.commits_since_checkpoint = 0;
        log::debug!("Checkpointed {} at sequence {}", self.board, self.sequence);
        Ok(())
    }

    fn mark_processed(&mut self, session: SessionId, local_seq: u64) {
        self.processed.entry(session).or_default().insert(local_seq);
        self.last_active.insert(session, self.sequence);
    }

    fn forget_idle_sessions(&mut self) {
        let retention = self.config.processed_retention;
        if retention == 0 {
            return;
        }
        let sequence = self.sequence;
        let idle: Vec<SessionId> = self
            .last_active
            .iter()
            .filter(|(_, active)| active.saturating_add(retention) < sequence)
            .map(|(session, _)| *session)
            .collect();
        for session in &idle {
            self.processed.remove(session);
            self.last_active.remove(session);
        }
        if !idle.is_empty() {
            log::debug!("Forgot {} idle sessions on {}", idle.len(), self.board);
        }
    }
}
