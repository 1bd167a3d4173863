//! Per-session undo/redo history of reversible ops.
//!
//! Entries store ops, not document snapshots: undoing an edit only restores
//! the fields that edit touched, so concurrent edits by other sessions are
//! left alone.

use crate::document::Prepared;
use crate::mutation::Op;

/// Maximum number of undo entries to keep.
pub const MAX_UNDO_HISTORY: usize = 50;

/// One undoable edit.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Local sequence number of the mutation that last carried this edit out.
    pub seq: u64,
    /// Re-applies the edit.
    pub op: Op,
    /// Reverts the edit.
    pub inverse: Op,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Moved {
    ToUndo,
    ToRedo,
}

/// Undo and redo stacks for one session.
#[derive(Debug, Clone)]
pub struct History {
    undo_stack: Vec<HistoryEntry>,
    redo_stack: Vec<HistoryEntry>,
    max_depth: usize,
    last_moved: Option<Moved>,
}

impl Default for History {
    fn default() -> Self {
        Self::new(MAX_UNDO_HISTORY)
    }
}

impl History {
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_depth: max_depth.max(1),
            last_moved: None,
        }
    }

    /// Record a fresh local edit. Clears the redo stack.
    pub fn record(&mut self, seq: u64, op: Op, inverse: Op) {
        self.undo_stack.push(HistoryEntry { seq, op, inverse });
        self.redo_stack.clear();
        self.last_moved = None;

        if self.undo_stack.len() > self.max_depth {
            self.undo_stack.remove(0);
        }
    }

    /// Pop the latest edit, move it to the redo stack and return the op
    /// that reverts it.
    pub fn undo(&mut self) -> Option<Op> {
        let entry = self.undo_stack.pop()?;
        let inverse = entry.inverse.clone();
        self.redo_stack.push(entry);
        self.last_moved = Some(Moved::ToRedo);
        Some(inverse)
    }

    /// Pop the latest undone edit, move it back to the undo stack and
    /// return the op that re-applies it.
    pub fn redo(&mut self) -> Option<Op> {
        let entry = self.redo_stack.pop()?;
        let op = entry.op.clone();
        self.undo_stack.push(entry);
        self.last_moved = Some(Moved::ToUndo);
        Some(op)
    }

    /// Bind the entry just moved by [`History::undo`] or [`History::redo`]
    /// to the mutation that carried the move out.
    pub fn bind_moved(&mut self, seq: u64, prepared: &Prepared) {
        let entry = match self.last_moved.take() {
            Some(Moved::ToRedo) => self.redo_stack.last_mut(),
            Some(Moved::ToUndo) => self.undo_stack.last_mut(),
            None => None,
        };
        if let Some(entry) = entry {
            entry.seq = seq;
        }
        self.rebind(seq, prepared);
    }

    /// Drop the entry just moved; its op could not be applied.
    pub fn discard_moved(&mut self) {
        match self.last_moved.take() {
            Some(Moved::ToRedo) => {
                self.redo_stack.pop();
            }
            Some(Moved::ToUndo) => {
                self.undo_stack.pop();
            }
            None => {}
        }
    }

    /// Refresh the entry carried out by mutation `seq` after it was resolved
    /// again against a changed document.
    pub fn rebind(&mut self, seq: u64, prepared: &Prepared) {
        if let Some(entry) = self.undo_stack.iter_mut().find(|e| e.seq == seq) {
            entry.op = prepared.op.clone();
            entry.inverse = prepared.inverse.clone();
        }
        // Redo entries were carried out by an undo, so the roles swap.
        if let Some(entry) = self.redo_stack.iter_mut().find(|e| e.seq == seq) {
            entry.op = prepared.inverse.clone();
            entry.inverse = prepared.op.clone();
        }
    }

    /// Remove every entry carried out by mutation `seq`, which the
    /// coordinator refused.
    pub fn invalidate(&mut self, seq: u64) -> bool {
        let before = self.undo_stack.len() + self.redo_stack.len();
        self.undo_stack.retain(|e| e.seq != seq);
        self.redo_stack.retain(|e| e.seq != seq);
        self.last_moved = None;
        before != self.undo_stack.len() + self.redo_stack.len()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.last_moved = None;
    }
}
