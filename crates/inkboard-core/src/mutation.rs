//! Mutations: the atomic, reversible edits exchanged between sessions and
//! the board coordinator.

use crate::error::ValidationError;
use crate::patch::LayerPatch;
use crate::shapes::{Layer, LayerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Opaque id of one connected session, supplied by the identity layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Board identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoardId(pub String);

impl BoardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Board ids double as directory names in the file store, so they are
    /// restricted to a conservative character set.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= 128
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BoardId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A layer removed by a delete, kept so the delete can be inverted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedLayer {
    pub layer: Layer,
    pub position: usize,
}

/// One document edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// Insert `layer` at `position` in the paint order (clamped to the end).
    InsertLayer {
        id: LayerId,
        layer: Layer,
        position: usize,
    },
    /// Remove a layer. `removed` is filled in when the delete is resolved
    /// against a document.
    DeleteLayer {
        id: LayerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        removed: Option<RemovedLayer>,
    },
    /// Overwrite the field groups in `after`. `before` holds the values the
    /// edit replaced.
    UpdateLayer {
        id: LayerId,
        before: LayerPatch,
        after: LayerPatch,
    },
    /// Move a layer within the paint order.
    Reorder { id: LayerId, from: usize, to: usize },
}

impl Op {
    pub fn insert(layer: Layer, position: usize) -> Self {
        Op::InsertLayer {
            id: layer.id(),
            layer,
            position,
        }
    }

    pub fn delete(id: LayerId) -> Self {
        Op::DeleteLayer { id, removed: None }
    }

    /// An update whose `before` values are captured when it is applied.
    pub fn update(id: LayerId, after: LayerPatch) -> Self {
        Op::UpdateLayer {
            id,
            before: LayerPatch::new(),
            after,
        }
    }

    pub fn reorder(id: LayerId, from: usize, to: usize) -> Self {
        Op::Reorder { id, from, to }
    }

    /// The layer this op targets.
    pub fn layer_id(&self) -> LayerId {
        match self {
            Op::InsertLayer { id, .. }
            | Op::DeleteLayer { id, .. }
            | Op::UpdateLayer { id, .. }
            | Op::Reorder { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Op::InsertLayer { .. } => "insert_layer",
            Op::DeleteLayer { .. } => "delete_layer",
            Op::UpdateLayer { .. } => "update_layer",
            Op::Reorder { .. } => "reorder",
        }
    }

    /// Structural checks that do not need a document.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Op::InsertLayer { id, layer, .. } => {
                if layer.id() != *id {
                    return Err(ValidationError::IdMismatch {
                        expected: *id,
                        actual: layer.id(),
                    });
                }
                layer.validate()
            }
            Op::DeleteLayer { id, removed } => match removed {
                Some(removed) if removed.layer.id() != *id => Err(ValidationError::IdMismatch {
                    expected: *id,
                    actual: removed.layer.id(),
                }),
                Some(removed) => removed.layer.validate(),
                None => Ok(()),
            },
            Op::UpdateLayer { before, after, .. } => {
                if after.is_empty() {
                    return Err(ValidationError::EmptyUpdate);
                }
                if !before.is_empty() && !before.same_fields(after) {
                    return Err(ValidationError::MismatchedPatch);
                }
                after.validate()
            }
            Op::Reorder { .. } => Ok(()),
        }
    }
}

/// A sequenced edit envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub session: SessionId,
    /// Per-session sequence number, starting at 1.
    pub local_seq: u64,
    /// Assigned by the coordinator on commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_seq: Option<u64>,
    pub op: Op,
}

impl Mutation {
    pub fn new(session: SessionId, local_seq: u64, op: Op) -> Self {
        Self {
            session,
            local_seq,
            global_seq: None,
            op,
        }
    }

    /// The `(session, local_seq)` pair used to detect redelivery.
    pub fn key(&self) -> (SessionId, u64) {
        (self.session, self.local_seq)
    }

    pub fn is_committed(&self) -> bool {
        self.global_seq.is_some()
    }

    /// Structural validation of a mutation submitted for commit.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.local_seq == 0 {
            return Err(ValidationError::ZeroSequence);
        }
        if let Some(seq) = self.global_seq {
            return Err(ValidationError::AlreadySequenced(seq));
        }
        self.op.validate()
    }
}

/// Which per-session sequence numbers a board has already committed.
///
/// Sessions number their mutations 1, 2, 3... but a mutation that failed to
/// persist is retried later, so commits may arrive out of order. The record
/// keeps a contiguous watermark plus the sparse set above it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedSeqs {
    /// Every sequence number `<= watermark` has been processed.
    pub watermark: u64,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub above: BTreeSet<u64>,
}

impl ProcessedSeqs {
    pub fn contains(&self, seq: u64) -> bool {
        seq <= self.watermark || self.above.contains(&seq)
    }

    pub fn insert(&mut self, seq: u64) {
        if self.contains(seq) {
            return;
        }
        self.above.insert(seq);
        while self.above.remove(&(self.watermark + 1)) {
            self.watermark += 1;
        }
    }

    /// Highest sequence number seen.
    pub fn highest(&self) -> u64 {
        self.above.last().copied().unwrap_or(self.watermark)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::FieldValue;
    use crate::shapes::Rectangle;
    use kurbo::Point;

    #[test]
    fn test_processed_seqs_advances_watermark() {
        let mut seen = ProcessedSeqs::default();
        seen.insert(1);
        seen.insert(3);
        assert_eq!(seen.watermark, 1);
        assert!(seen.contains(3));
        assert!(!seen.contains(2));

        seen.insert(2);
        assert_eq!(seen.watermark, 3);
        assert!(seen.above.is_empty());
        assert_eq!(seen.highest(), 3);
    }

    #[test]
    fn test_validate_rejects_id_mismatch() {
        let layer: Layer = Rectangle::new(Point::ZERO, 1.0, 1.0).into();
        let op = Op::InsertLayer {
            id: Uuid::new_v4(),
            layer,
            position: 0,
        };
        assert!(matches!(op.validate(), Err(ValidationError::IdMismatch { .. })));
    }

    #[test]
    fn test_validate_envelope() {
        let session = SessionId::new();
        let op = Op::update(Uuid::new_v4(), LayerPatch::new());
        assert_eq!(
            Mutation::new(session, 1, op).validate(),
            Err(ValidationError::EmptyUpdate)
        );

        let op = Op::delete(Uuid::new_v4());
        assert_eq!(
            Mutation::new(session, 0, op.clone()).validate(),
            Err(ValidationError::ZeroSequence)
        );

        let mut committed = Mutation::new(session, 1, op);
        committed.global_seq = Some(4);
        assert_eq!(committed.validate(), Err(ValidationError::AlreadySequenced(4)));
    }

    #[test]
    fn test_update_with_mismatched_before_is_invalid() {
        let op = Op::UpdateLayer {
            id: Uuid::new_v4(),
            before: LayerPatch::new().with(FieldValue::Opacity(1.0)),
            after: LayerPatch::new().with(FieldValue::StrokeWidth(4.0)),
        };
        assert_eq!(op.validate(), Err(ValidationError::MismatchedPatch));
    }

    #[test]
    fn test_board_id_validity() {
        assert!(BoardId::new("team-42_sketch").is_valid());
        assert!(!BoardId::new("../etc").is_valid());
        assert!(!BoardId::new("").is_valid());
    }

    #[test]
    fn test_op_serde_tag() {
        let op = Op::reorder(Uuid::nil(), 0, 2);
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "reorder");
        assert_eq!(json["to"], 2);
    }
}
