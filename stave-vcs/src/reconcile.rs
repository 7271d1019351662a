//! Primitives for reconciling two histories.
//!
//! Policy: nothing here merges automatically. A foreign revision is imported
//! under its declared parent as a sibling branch and never moves head; the
//! host compares snapshots with [`diff_snapshots`] and decides what to keep
//! by editing the document and committing.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payload::Payload;
use crate::snapshot::Snapshot;

/// Payload shipped alongside exported revision metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedPayload {
    pub entity_id: Uuid,
    pub delta_id: Uuid,
    pub data: Payload,
}

/// How one entity differs between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityChange {
    /// Present only in the other snapshot.
    Added,
    /// Present only in the base snapshot.
    Removed,
    /// Present in both; lists the facet kinds whose payload differs.
    Changed { facets: Vec<String> },
}

/// Per-entity differences from `base` to `other`, ordered by entity id.
/// Entities identical in both are omitted.
pub fn diff_snapshots(base: &Snapshot, other: &Snapshot) -> Vec<(Uuid, EntityChange)> {
    let mut changes = Vec::new();

    for item in base.iter() {
        match other.get(item.id) {
            None => changes.push((item.id, EntityChange::Removed)),
            Some(theirs) => {
                let mut facets: Vec<String> = item
                    .state
                    .iter()
                    .filter(|(kind, payload)| theirs.state.get(kind) != Some(*payload))
                    .map(|(kind, _)| kind.to_string())
                    .collect();
                facets.extend(
                    theirs
                        .state
                        .kinds()
                        .filter(|kind| item.state.get(kind).is_none())
                        .map(str::to_string),
                );
                if !facets.is_empty() {
                    changes.push((item.id, EntityChange::Changed { facets }));
                }
            }
        }
    }

    for item in other.iter() {
        if !base.contains(item.id) {
            changes.push((item.id, EntityChange::Added));
        }
    }

    changes.sort_by_key(|(id, _)| *id);
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::EntityState;
    use crate::snapshot::SnapshotItem;
    use serde_json::json;

    fn entity(id: Uuid, state: EntityState) -> SnapshotItem {
        SnapshotItem {
            id,
            name: "Track".into(),
            type_tag: "track".into(),
            state,
        }
    }

    #[test]
    fn test_identical_snapshots() {
        let id = Uuid::new_v4();
        let snapshot: Snapshot = vec![entity(id, EntityState::new().with_facet("mute", json!(true)))]
            .into_iter()
            .collect();
        assert!(diff_snapshots(&snapshot, &snapshot).is_empty());
    }

    #[test]
    fn test_added_removed_changed() {
        let (kept, gone, new) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let base: Snapshot = vec![
            entity(kept, EntityState::new().with_facet("mute", json!(false)).with_facet("path", json!("/A"))),
            entity(gone, EntityState::new()),
        ]
        .into_iter()
        .collect();
        let other: Snapshot = vec![
            entity(kept, EntityState::new().with_facet("mute", json!(true)).with_facet("path", json!("/A")).with_facet("colour", json!("red"))),
            entity(new, EntityState::new()),
        ]
        .into_iter()
        .collect();

        let changes = diff_snapshots(&base, &other);
        assert_eq!(changes.len(), 3);
        assert!(changes.contains(&(gone, EntityChange::Removed)));
        assert!(changes.contains(&(new, EntityChange::Added)));
        assert!(changes.contains(&(
            kept,
            EntityChange::Changed {
                facets: vec!["mute".into(), "colour".into()]
            }
        )));
    }
}
