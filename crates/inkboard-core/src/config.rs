//! Tunables for the coordinator and client sessions.

use crate::history::MAX_UNDO_HISTORY;
use crate::presence::STALE_THRESHOLD;
use std::time::Duration;

/// Number of recent commits kept for catch-up after a short disconnect.
pub const DEFAULT_RECENT_LOG: usize = 100;

/// Commits between automatic checkpoints.
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 500;

/// Commits a session may stay silent before its processed pairs are dropped.
pub const DEFAULT_PROCESSED_RETENTION: u64 = 100_000;

/// Per-board coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub recent_log_capacity: usize,
    /// Write a checkpoint after this many commits. `0` disables automatic
    /// checkpoints.
    pub checkpoint_interval: u64,
    /// At each checkpoint, forget what was processed from sessions that
    /// submitted nothing in this many commits. Such a session that comes
    /// back still holding an unanswered edit may see it commit twice.
    /// `0` remembers every session forever.
    pub processed_retention: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            recent_log_capacity: DEFAULT_RECENT_LOG,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            processed_retention: DEFAULT_PROCESSED_RETENTION,
        }
    }
}

/// Client session settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub history_depth: usize,
    /// Remote presence older than this is dropped.
    pub presence_timeout: Duration,
    /// Tolerance used when turning a pencil draft into a path layer.
    pub simplify_tolerance: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_depth: MAX_UNDO_HISTORY,
            presence_timeout: STALE_THRESHOLD,
            simplify_tolerance: 1.0,
        }
    }
}
