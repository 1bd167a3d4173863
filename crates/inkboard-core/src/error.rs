//! Error types shared across the core.

use crate::shapes::{LayerId, LayerKind};
use crate::patch::LayerField;
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A mutation that is malformed on its own or against the sender's local
/// document. Reported to the originating session only.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid value for {0}")]
    InvalidValue(&'static str),
    #[error("Layer {0} does not exist")]
    UnknownLayer(LayerId),
    #[error("Edit on layer {id} conflicts with the document: {reason}")]
    Conflict { id: LayerId, reason: String },
    #[error("Inserted layer carries id {actual}, expected {expected}")]
    IdMismatch { expected: LayerId, actual: LayerId },
    #[error("Field {field:?} does not apply to {kind} layers")]
    FieldNotApplicable { field: LayerField, kind: LayerKind },
    #[error("Update carries no fields")]
    EmptyUpdate,
    #[error("Update before/after field sets differ")]
    MismatchedPatch,
    #[error("Per-session sequence numbers start at 1")]
    ZeroSequence,
    #[error("Mutation already carries global sequence {0}")]
    AlreadySequenced(u64),
}

/// Coordinator-level semantic rejection. The originating session must roll
/// its optimistic state back; the edit is discarded, not retried.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejected {
    /// The target layer was deleted before this mutation was sequenced.
    #[error("Layer {id} is gone")]
    LayerGone { id: LayerId },
    /// The mutation no longer fits the layer's current state.
    #[error("Conflicting edit on layer {id}: {reason}")]
    Conflict { id: LayerId, reason: String },
}

impl Rejected {
    pub fn layer_id(&self) -> LayerId {
        match self {
            Rejected::LayerGone { id } | Rejected::Conflict { id, .. } => *id,
        }
    }
}

impl From<Rejected> for ValidationError {
    fn from(value: Rejected) -> Self {
        match value {
            Rejected::LayerGone { id } => ValidationError::UnknownLayer(id),
            Rejected::Conflict { id, reason } => ValidationError::Conflict { id, reason },
        }
    }
}

/// Why the coordinator did not commit a mutation.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("Invalid mutation: {0}")]
    Invalid(#[from] ValidationError),
    #[error("Rejected: {0}")]
    Rejected(#[from] Rejected),
    /// The durable store refused the write; nothing was applied or broadcast
    /// and the session should retry.
    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_conflict_keeps_its_reason() {
        let id = Uuid::new_v4();
        let rejected = Rejected::Conflict {
            id,
            reason: "update does not apply to text layers".to_string(),
        };
        let err = ValidationError::from(rejected);
        assert_eq!(
            err,
            ValidationError::Conflict {
                id,
                reason: "update does not apply to text layers".to_string(),
            }
        );
        assert!(err.to_string().contains("does not apply to text layers"));

        let gone = ValidationError::from(Rejected::LayerGone { id });
        assert_eq!(gone, ValidationError::UnknownLayer(id));
    }
}
