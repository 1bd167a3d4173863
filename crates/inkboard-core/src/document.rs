//! The board document: layers keyed by id plus their paint order.

use crate::error::{Rejected, ValidationError};
use crate::mutation::{Op, RemovedLayer};
use crate::shapes::{Layer, LayerId};
use kurbo::Rect;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// An op resolved against a specific document state, with its exact inverse.
#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    /// The op with positions clamped and `before`/`removed` captured.
    pub op: Op,
    /// Applying this right after `op` restores the touched state.
    pub inverse: Op,
    base_revision: u64,
}

/// Immutable copy of a board's layers and paint order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub layers: BTreeMap<LayerId, Layer>,
    /// Paint order, back to front.
    pub layer_ids: Vec<LayerId>,
}

impl BoardSnapshot {
    pub fn len(&self) -> usize {
        self.layer_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layer_ids.is_empty()
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(&id)
    }

    /// Layers in paint order.
    pub fn ordered(&self) -> impl Iterator<Item = &Layer> {
        self.layer_ids.iter().filter_map(|id| self.layers.get(id))
    }

    /// Union of every layer's bounds, or `None` for an empty board.
    pub fn bounds(&self) -> Option<Rect> {
        self.ordered()
            .map(|layer| layer.placement().transform_rect_bbox(layer.bounds()))
            .reduce(|acc, rect| acc.union(rect))
    }

    /// Check that `layers` and `layer_ids` describe the same set of ids and
    /// that every layer is well formed.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.layers.len() != self.layer_ids.len() {
            return Err(ValidationError::InvalidValue("layer_ids"));
        }
        for id in &self.layer_ids {
            let layer = self
                .layers
                .get(id)
                .ok_or(ValidationError::UnknownLayer(*id))?;
            if layer.id() != *id {
                return Err(ValidationError::IdMismatch {
                    expected: *id,
                    actual: layer.id(),
                });
            }
            layer.validate()?;
        }
        Ok(())
    }
}

/// The plain board state. Every mutation goes through [`BoardDocument::apply`],
/// which keeps `layers` and `layer_ids` in lockstep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardDocument {
    layers: BTreeMap<LayerId, Layer>,
    layer_ids: Vec<LayerId>,
    revision: u64,
}

impl BoardDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a document from a snapshot, checking its invariants first.
    pub fn from_snapshot(snapshot: BoardSnapshot) -> Result<Self, ValidationError> {
        snapshot.validate()?;
        Ok(Self {
            layers: snapshot.layers,
            layer_ids: snapshot.layer_ids,
            revision: 0,
        })
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            layers: self.layers.clone(),
            layer_ids: self.layer_ids.clone(),
        }
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(&id)
    }

    pub fn contains(&self, id: LayerId) -> bool {
        self.layers.contains_key(&id)
    }

    pub fn layer_ids(&self) -> &[LayerId] {
        &self.layer_ids
    }

    pub fn position(&self, id: LayerId) -> Option<usize> {
        self.layer_ids.iter().position(|l| *l == id)
    }

    pub fn len(&self) -> usize {
        self.layer_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layer_ids.is_empty()
    }

    /// Number of ops applied to this document since it was created or loaded.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Topmost layer under `point`.
    pub fn hit_test(&self, point: kurbo::Point, tolerance: f64) -> Option<LayerId> {
        self.layer_ids
            .iter()
            .rev()
            .copied()
            .find(|id| self.layers.get(id).is_some_and(|l| l.hit_test(point, tolerance)))
    }

    /// Resolve `op` against the current state without changing anything.
    pub fn prepare(&self, op: &Op) -> Result<Prepared, Rejected> {
        let (op, inverse) = match op {
            Op::InsertLayer {
                id,
                layer,
                position,
            } => {
                if self.contains(*id) {
                    return Err(Rejected::Conflict {
                        id: *id,
                        reason: "layer already exists".to_string(),
                    });
                }
                let position = (*position).min(self.layer_ids.len());
                let resolved = Op::InsertLayer {
                    id: *id,
                    layer: layer.clone(),
                    position,
                };
                let inverse = Op::DeleteLayer {
                    id: *id,
                    removed: Some(RemovedLayer {
                        layer: layer.clone(),
                        position,
                    }),
                };
                (resolved, inverse)
            }
            Op::DeleteLayer { id, .. } => {
                let (layer, position) = self.locate(*id)?;
                let removed = RemovedLayer {
                    layer: layer.clone(),
                    position,
                };
                let inverse = Op::InsertLayer {
                    id: *id,
                    layer: layer.clone(),
                    position,
                };
                let resolved = Op::DeleteLayer {
                    id: *id,
                    removed: Some(removed),
                };
                (resolved, inverse)
            }
            Op::UpdateLayer { id, after, .. } => {
                let (layer, _) = self.locate(*id)?;
                let before = layer.capture(after).ok_or_else(|| Rejected::Conflict {
                    id: *id,
                    reason: format!("update does not apply to {} layers", layer.kind()),
                })?;
                let resolved = Op::UpdateLayer {
                    id: *id,
                    before: before.clone(),
                    after: after.clone(),
                };
                let inverse = Op::UpdateLayer {
                    id: *id,
                    before: after.clone(),
                    after: before,
                };
                (resolved, inverse)
            }
            Op::Reorder { id, to, .. } => {
                let (_, from) = self.locate(*id)?;
                let to = (*to).min(self.layer_ids.len().saturating_sub(1));
                (
                    Op::Reorder { id: *id, from, to },
                    Op::Reorder {
                        id: *id,
                        from: to,
                        to: from,
                    },
                )
            }
        };
        Ok(Prepared {
            op,
            inverse,
            base_revision: self.revision,
        })
    }

    /// Resolve and apply `op`. On rejection the document is untouched.
    pub fn apply(&mut self, op: &Op) -> Result<Prepared, Rejected> {
        let prepared = self.prepare(op)?;
        self.execute(&prepared);
        Ok(prepared)
    }

    /// Apply an op previously resolved by [`BoardDocument::prepare`] against
    /// this exact state.
    pub(crate) fn execute(&mut self, prepared: &Prepared) {
        debug_assert_eq!(prepared.base_revision, self.revision, "stale prepared op");
        match &prepared.op {
            Op::InsertLayer {
                id,
                layer,
                position,
            } => {
                self.layer_ids.insert(*position, *id);
                self.layers.insert(*id, layer.clone());
            }
            Op::DeleteLayer { id, removed } => {
                if let Some(removed) = removed {
                    self.layer_ids.remove(removed.position);
                }
                self.layers.remove(id);
            }
            Op::UpdateLayer { id, after, .. } => {
                if let Some(layer) = self.layers.get_mut(id) {
                    layer.apply_patch(after);
                }
            }
            Op::Reorder { id, from, to } => {
                self.layer_ids.remove(*from);
                self.layer_ids.insert(*to, *id);
            }
        }
        self.revision += 1;
    }

    fn locate(&self, id: LayerId) -> Result<(&Layer, usize), Rejected> {
        match (self.layers.get(&id), self.position(id)) {
            (Some(layer), Some(position)) => Ok((layer, position)),
            _ => Err(Rejected::LayerGone { id }),
        }
    }
}

/// A [`BoardDocument`] shared between one writer and many readers.
///
/// Readers take the lock only for the duration of a copy, so they never see
/// a half-applied op.
#[derive(Debug, Default)]
pub struct DocumentStore {
    inner: RwLock<BoardDocument>,
}

impl DocumentStore {
    pub fn new(document: BoardDocument) -> Self {
        Self {
            inner: RwLock::new(document),
        }
    }

    pub fn apply(&self, op: &Op) -> Result<Prepared, Rejected> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(op)
    }

    pub fn prepare(&self, op: &Op) -> Result<Prepared, Rejected> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .prepare(op)
    }

    pub(crate) fn execute(&self, prepared: &Prepared) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .execute(prepared)
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    pub fn get(&self, id: LayerId) -> Option<Layer> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn revision(&self) -> u64 {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .revision()
    }
}
