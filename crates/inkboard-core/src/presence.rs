//! Presence: ephemeral per-session state (cursor, selection, pencil draft,
//! pen color) shared with collaborators but never persisted.
//!
//! Records are replaced wholesale on every update. Delivery is best effort;
//! a lost update is corrected by the next one.

use crate::mutation::SessionId;
use crate::shapes::{LayerId, LayerStyle, Path, SerializableColor};
use kurbo::Point;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

/// Remove peers not updated in 5 seconds.
pub const STALE_THRESHOLD: Duration = Duration::from_secs(5);

/// Upper bound on points in a pencil draft.
pub const MAX_DRAFT_POINTS: usize = 10_000;

/// Display identity of a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    pub color: SerializableColor,
}

/// Presence state of one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Point>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub selection: BTreeSet<LayerId>,
    /// In-progress freehand stroke.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pencil_draft: Option<Vec<Point>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pen_color: Option<SerializableColor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
}

impl PresenceRecord {
    pub fn with_cursor(mut self, cursor: Point) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn with_selection(mut self, selection: impl IntoIterator<Item = LayerId>) -> Self {
        self.selection = selection.into_iter().collect();
        self
    }

    pub fn with_user(mut self, name: impl Into<String>, color: SerializableColor) -> Self {
        self.user = Some(UserInfo {
            name: name.into(),
            color,
        });
        self
    }

    /// Whether the record is safe to relay: finite coordinates and a bounded
    /// draft.
    pub fn is_valid(&self) -> bool {
        let finite = |p: &Point| p.x.is_finite() && p.y.is_finite();
        self.cursor.as_ref().is_none_or(finite)
            && self
                .pencil_draft
                .as_ref()
                .is_none_or(|d| d.len() <= MAX_DRAFT_POINTS && d.iter().all(finite))
    }

    /// The pencil draft as a path layer, simplified with `tolerance`.
    pub fn draft_path(&self, tolerance: f64) -> Option<Path> {
        let points = self.pencil_draft.as_ref().filter(|d| !d.is_empty())?;
        let mut style = LayerStyle::default();
        if let Some(color) = self.pen_color {
            style.stroke_color = color;
        }
        let mut path = Path::from_points(points.clone()).with_style(style);
        path.simplify(tolerance);
        Some(path)
    }
}

#[derive(Debug, Clone)]
struct PeerPresence {
    record: PresenceRecord,
    last_seen: Instant,
}

/// Presence of remote sessions as seen by one client.
#[derive(Debug, Clone)]
pub struct PresenceTable {
    peers: HashMap<SessionId, PeerPresence>,
    stale_after: Duration,
}

impl Default for PresenceTable {
    fn default() -> Self {
        Self::new(STALE_THRESHOLD)
    }
}

impl PresenceTable {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            peers: HashMap::new(),
            stale_after,
        }
    }

    /// Replace a peer's record.
    pub fn update(&mut self, session: SessionId, record: PresenceRecord) {
        self.update_at(session, record, Instant::now());
    }

    pub(crate) fn update_at(&mut self, session: SessionId, record: PresenceRecord, now: Instant) {
        self.peers.insert(
            session,
            PeerPresence {
                record,
                last_seen: now,
            },
        );
    }

    pub fn remove(&mut self, session: SessionId) -> Option<PresenceRecord> {
        self.peers.remove(&session).map(|p| p.record)
    }

    pub fn get(&self, session: SessionId) -> Option<&PresenceRecord> {
        self.peers.get(&session).map(|p| &p.record)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SessionId, &PresenceRecord)> {
        self.peers.iter().map(|(id, p)| (*id, &p.record))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    /// Sessions whose selection includes `layer`.
    pub fn selecting(&self, layer: LayerId) -> Vec<SessionId> {
        let mut sessions: Vec<SessionId> = self
            .peers
            .iter()
            .filter(|(_, p)| p.record.selection.contains(&layer))
            .map(|(id, _)| *id)
            .collect();
        sessions.sort();
        sessions
    }

    /// Drop peers not heard from within the staleness threshold.
    pub fn prune_stale(&mut self) -> Vec<SessionId> {
        self.prune_stale_at(Instant::now())
    }

    pub(crate) fn prune_stale_at(&mut self, now: Instant) -> Vec<SessionId> {
        let stale_after = self.stale_after;
        let mut removed = Vec::new();
        self.peers.retain(|id, p| {
            let fresh = now.saturating_duration_since(p.last_seen) < stale_after;
            if !fresh {
                removed.push(*id);
            }
            fresh
        });
        removed.sort();
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_update_replaces_wholesale() {
        let mut table = PresenceTable::default();
        let peer = SessionId::new();
        let layer = Uuid::new_v4();
        table.update(
            peer,
            PresenceRecord::default()
                .with_cursor(Point::new(1.0, 2.0))
                .with_selection([layer]),
        );
        table.update(peer, PresenceRecord::default().with_cursor(Point::new(3.0, 4.0)));

        let record = table.get(peer).unwrap();
        assert_eq!(record.cursor, Some(Point::new(3.0, 4.0)));
        assert!(record.selection.is_empty());
        assert!(table.selecting(layer).is_empty());
    }

    #[test]
    fn test_prune_stale() {
        let mut table = PresenceTable::new(Duration::from_secs(5));
        let start = Instant::now();
        let old = SessionId::new();
        let fresh = SessionId::new();
        table.update_at(old, PresenceRecord::default(), start);
        table.update_at(fresh, PresenceRecord::default(), start + Duration::from_secs(4));

        let removed = table.prune_stale_at(start + Duration::from_secs(6));
        assert_eq!(removed, vec![old]);
        assert_eq!(table.len(), 1);
        assert!(table.get(fresh).is_some());
    }

    #[test]
    fn test_validity() {
        assert!(PresenceRecord::default().is_valid());
        let bad = PresenceRecord::default().with_cursor(Point::new(f64::NAN, 0.0));
        assert!(!bad.is_valid());
    }

    #[test]
    fn test_draft_path_uses_pen_color() {
        let record = PresenceRecord {
            pencil_draft: Some(vec![Point::ZERO, Point::new(1.0, 0.0), Point::new(2.0, 0.0)]),
            pen_color: Some(SerializableColor::new(255, 0, 0, 255)),
            ..PresenceRecord::default()
        };
        let path = record.draft_path(0.5).unwrap();
        assert_eq!(path.points, vec![Point::ZERO, Point::new(2.0, 0.0)]);
        assert_eq!(path.style.stroke_color, SerializableColor::new(255, 0, 0, 255));
        assert!(PresenceRecord::default().draft_path(0.5).is_none());
    }

    #[test]
    fn test_empty_record_serializes_compactly() {
        let json = serde_json::to_string(&PresenceRecord::default()).unwrap();
        assert_eq!(json, "{}");
    }
}
