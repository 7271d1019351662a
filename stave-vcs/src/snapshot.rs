//! Full document state at one revision.
//!
//! Reconstruction collects, per entity, the revision items met along a
//! path, then resolves payloads only for entities that are still alive at
//! its end. An entity removed on the path never touches the pack, so its
//! payloads may be pruned.
//!
//! ```text
//!   record(r1) record(r2) ... record(rn)     lineage checks only
//!        └────────────┬────────────┘
//!                materialize()               deltas_with_data + apply,
//!                                            live entities only
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::VcsError;
use crate::payload::EntityState;
use crate::revision::Revision;
use crate::revision_item::{RevisionItem, RevisionItemType};

/// One reconstructed entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotItem {
    pub id: Uuid,
    pub name: String,
    pub type_tag: String,
    pub state: EntityState,
}

/// Every live entity at one revision, ordered by id, plus the ids removed
/// on the way there. A removed id never comes back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    items: BTreeMap<Uuid, SnapshotItem>,
    #[serde(default)]
    removed: BTreeSet<Uuid>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<&SnapshotItem> {
        self.items.get(&id)
    }

    pub fn state_of(&self, id: Uuid) -> Option<&EntityState> {
        self.items.get(&id).map(|item| &item.state)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.items.contains_key(&id)
    }

    /// Whether `id` was removed at or before this revision.
    pub fn was_removed(&self, id: Uuid) -> bool {
        self.removed.contains(&id)
    }

    pub fn removed_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.removed.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.items.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SnapshotItem> {
        self.items.values()
    }

    /// First entity carrying `name`.
    pub fn find_by_name(&self, name: &str) -> Option<&SnapshotItem> {
        self.items.values().find(|item| item.name == name)
    }

    /// Fold one revision on top of this state. On error the snapshot is
    /// left unchanged.
    pub fn apply_revision(&mut self, revision: &Revision) -> Result<(), VcsError> {
        let mut replay = Replay::new(self.clone());
        replay.record(revision)?;
        *self = replay.materialize()?;
        Ok(())
    }
}

// ─── Replay ─────────────────────────────────────────────────────────

/// Revision items collected per entity on top of a resolved base.
pub(crate) struct Replay<'a> {
    base: Snapshot,
    pending: BTreeMap<Uuid, Vec<&'a RevisionItem>>,
}

impl<'a> Replay<'a> {
    pub(crate) fn new(base: Snapshot) -> Self {
        Self {
            base,
            pending: BTreeMap::new(),
        }
    }

    fn type_tag_of(&self, id: Uuid) -> Option<&str> {
        match self.base.items.get(&id) {
            Some(existing) => Some(existing.type_tag.as_str()),
            None => self.pending.get(&id)?.first().map(|item| item.type_tag()),
        }
    }

    /// Check one revision's items against the lineage so far and queue
    /// them. No payload is read.
    pub(crate) fn record(&mut self, revision: &'a Revision) -> Result<(), VcsError> {
        for item in revision.items() {
            let id = item.vcs_id();
            match item.item_type() {
                RevisionItemType::Added => {
                    if self.base.removed.contains(&id) {
                        return Err(VcsError::BrokenHistory(format!(
                            "revision {} re-adds entity {id} which was removed earlier",
                            revision.id()
                        )));
                    }
                    if self.type_tag_of(id).is_some() {
                        return Err(VcsError::BrokenHistory(format!(
                            "revision {} adds entity {id} which already exists",
                            revision.id()
                        )));
                    }
                    self.pending.insert(id, vec![item]);
                }
                RevisionItemType::Changed => {
                    let existing = self.type_tag_of(id).ok_or_else(|| {
                        VcsError::BrokenHistory(format!(
                            "revision {} changes entity {id} which does not exist at its parent",
                            revision.id()
                        ))
                    })?;
                    if existing != item.type_tag() {
                        return Err(VcsError::SchemaViolation(format!(
                            "entity {id} changes type from '{existing}' to '{}'",
                            item.type_tag()
                        )));
                    }
                    self.pending.entry(id).or_default().push(item);
                }
                RevisionItemType::Removed => {
                    let queued = self.pending.remove(&id).is_some();
                    let resolved = self.base.items.remove(&id).is_some();
                    if !queued && !resolved {
                        log::warn!(
                            "Revision {} removes entity {id} which is not present",
                            revision.id()
                        );
                    }
                    self.base.removed.insert(id);
                }
                RevisionItemType::Undefined => {
                    return Err(VcsError::SchemaViolation(format!(
                        "revision {} holds an item of undefined kind for entity {id}",
                        revision.id()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolve payloads of the entities alive now and apply their queued
    /// items in order.
    pub(crate) fn materialize(&self) -> Result<Snapshot, VcsError> {
        let mut snapshot = self.base.clone();
        for (id, items) in &self.pending {
            let Some(first) = items.first() else {
                continue;
            };
            let mut entity = snapshot.items.remove(id).unwrap_or_else(|| SnapshotItem {
                id: *id,
                name: first.vcs_name().to_string(),
                type_tag: first.type_tag().to_string(),
                state: EntityState::new(),
            });
            for item in items {
                let changes = item.deltas_with_data()?;
                entity.state = item.diff_logic().apply(&entity.state, &changes)?;
                entity.name = item.vcs_name().to_string();
            }
            snapshot.items.insert(*id, entity);
        }
        Ok(snapshot)
    }
}

impl FromIterator<SnapshotItem> for Snapshot {
    fn from_iter<I: IntoIterator<Item = SnapshotItem>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().map(|item| (item.id, item)).collect(),
            removed: BTreeSet::new(),
        }
    }
}
