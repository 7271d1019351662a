//! Revisions and the sparse history graph.
//!
//! ```text
//!            root (seq 0, no items)
//!              │
//!              R1 ── R2 ── R3          head = R3
//!                     │
//!                     └── R4           commit after undo forks a branch
//! ```
//!
//! A revision only holds items for entities that changed relative to its
//! parent. Full state is rebuilt by folding the root→target path, see
//! [`Snapshot`](crate::snapshot::Snapshot).

use std::time::SystemTime;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::diff_logic::DiffLogicRegistry;
use crate::error::{PackError, VcsError};
use crate::pack::PackPtr;
use crate::revision_item::{RevisionItem, RevisionItemType};
use crate::tree::{keys, SerializedNode};

/// One node of the history graph.
#[derive(Debug)]
pub struct Revision {
    id: Uuid,
    parent: Option<Uuid>,
    sequence: u64,
    message: String,
    /// Milliseconds since the Unix epoch.
    created_at: u64,
    items: Vec<RevisionItem>,
}

impl Revision {
    pub fn new(
        parent: Option<Uuid>,
        sequence: u64,
        message: impl Into<String>,
        items: Vec<RevisionItem>,
    ) -> Self {
        let created_at = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            id: Uuid::new_v4(),
            parent,
            sequence,
            message: message.into(),
            created_at,
            items,
        }
    }

    /// The origin of every history: no parent, no items.
    pub fn root() -> Self {
        Self::new(None, 0, "", Vec::new())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn parent(&self) -> Option<Uuid> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn items(&self) -> &[RevisionItem] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [RevisionItem] {
        &mut self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item_for(&self, entity_id: Uuid) -> Option<&RevisionItem> {
        self.items.iter().find(|item| item.vcs_id() == entity_id)
    }

    pub fn item_for_mut(&mut self, entity_id: Uuid) -> Option<&mut RevisionItem> {
        self.items.iter_mut().find(|item| item.vcs_id() == entity_id)
    }

    pub fn has_pending_data(&self) -> bool {
        self.items.iter().any(RevisionItem::has_pending_data)
    }

    /// Flush every item's pending payloads. Returns the number written.
    pub fn flush_data(&mut self) -> Result<usize, PackError> {
        let mut written = 0;
        for item in &mut self.items {
            written += item.flush_data()?;
        }
        Ok(written)
    }

    pub fn summary(&self) -> RevisionSummary {
        RevisionSummary {
            id: self.id,
            parent: self.parent,
            sequence: self.sequence,
            message: self.message.clone(),
            created_at: self.created_at,
            changes: self
                .items
                .iter()
                .map(|item| ChangeSummary {
                    entity_id: item.vcs_id(),
                    name: item.vcs_name().to_string(),
                    item_type: item.item_type(),
                    num_deltas: item.num_deltas(),
                })
                .collect(),
        }
    }

    pub fn serialize(&self) -> SerializedNode {
        let mut node = SerializedNode::new(keys::REVISION)
            .with_attribute(keys::ID, self.id)
            .with_attribute(keys::SEQUENCE, self.sequence)
            .with_attribute(keys::MESSAGE, &self.message)
            .with_attribute(keys::CREATED_AT, self.created_at);
        if let Some(parent) = self.parent {
            node.set_attribute(keys::PARENT, parent);
        }
        for item in &self.items {
            node.push_child(item.serialize());
        }
        node
    }

    pub fn deserialize(
        node: &SerializedNode,
        pack: PackPtr,
        registry: &DiffLogicRegistry,
    ) -> Result<Self, VcsError> {
        let root = node.find(keys::REVISION)?;

        let items = root
            .children
            .iter()
            .map(|child| RevisionItem::deserialize(child, pack.clone(), registry))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: root.require_uuid(keys::ID)?,
            parent: root.optional_uuid(keys::PARENT)?,
            sequence: root.integer_or(keys::SEQUENCE, 0)?.max(0) as u64,
            message: root.attribute(keys::MESSAGE).unwrap_or_default().to_string(),
            created_at: root.integer_or(keys::CREATED_AT, 0)?.max(0) as u64,
            items,
        })
    }
}

/// One line of a revision summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub entity_id: Uuid,
    pub name: String,
    pub item_type: RevisionItemType,
    pub num_deltas: usize,
}

/// Payload-free view of a revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionSummary {
    pub id: Uuid,
    pub parent: Option<Uuid>,
    pub sequence: u64,
    pub message: String,
    pub created_at: u64,
    pub changes: Vec<ChangeSummary>,
}

impl std::fmt::Display for RevisionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} {} \"{}\"", self.sequence, self.id, self.message)?;
        for change in &self.changes {
            write!(
                f,
                "\n    {:<8} {} ({} deltas)",
                change.item_type.as_str(),
                change.name,
                change.num_deltas
            )?;
        }
        Ok(())
    }
}

/// All revisions of one document, keyed by id.
#[derive(Debug)]
pub struct RevisionGraph {
    revisions: FxHashMap<Uuid, Revision>,
    children: FxHashMap<Uuid, Vec<Uuid>>,
    root: Uuid,
    next_sequence: u64,
}

impl RevisionGraph {
    /// Graph holding only `root`.
    pub fn new(root: Revision) -> Self {
        let root_id = root.id();
        let next_sequence = root.sequence() + 1;
        let mut revisions = FxHashMap::default();
        revisions.insert(root_id, root);
        Self {
            revisions,
            children: FxHashMap::default(),
            root: root_id,
            next_sequence,
        }
    }

    pub fn root(&self) -> Uuid {
        self.root
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.revisions.contains_key(&id)
    }

    pub fn get(&self, id: Uuid) -> Result<&Revision, VcsError> {
        self.revisions.get(&id).ok_or(VcsError::UnknownRevision(id))
    }

    pub fn get_mut(&mut self, id: Uuid) -> Result<&mut Revision, VcsError> {
        self.revisions.get_mut(&id).ok_or(VcsError::UnknownRevision(id))
    }

    /// Sequence number the next inserted revision should carry.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn children_of(&self, id: Uuid) -> &[Uuid] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Revisions ordered by sequence number.
    pub fn iter(&self) -> impl Iterator<Item = &Revision> {
        let mut revisions: Vec<&Revision> = self.revisions.values().collect();
        revisions.sort_by_key(|r| (r.sequence(), r.id()));
        revisions.into_iter()
    }

    pub fn revisions_mut(&mut self) -> impl Iterator<Item = &mut Revision> {
        self.revisions.values_mut()
    }

    /// Attach a revision under its parent.
    pub fn insert(&mut self, revision: Revision) -> Result<(), VcsError> {
        let id = revision.id();
        if self.revisions.contains_key(&id) {
            return Err(VcsError::BrokenHistory(format!("revision {id} already exists")));
        }
        let parent = revision.parent().ok_or_else(|| {
            VcsError::BrokenHistory(format!("revision {id} has no parent and is not the root"))
        })?;
        if !self.revisions.contains_key(&parent) {
            return Err(VcsError::BrokenHistory(format!(
                "revision {id} references unknown parent {parent}"
            )));
        }

        self.next_sequence = self.next_sequence.max(revision.sequence() + 1);
        self.children.entry(parent).or_default().push(id);
        self.revisions.insert(id, revision);
        Ok(())
    }

    /// Path from the root to `target`, both included.
    pub fn ancestry(&self, target: Uuid) -> Result<Vec<Uuid>, VcsError> {
        let mut path = Vec::new();
        let mut seen = FxHashSet::default();
        let mut cursor = Some(target);

        while let Some(id) = cursor {
            if !seen.insert(id) {
                return Err(VcsError::BrokenHistory(format!("cycle through revision {id}")));
            }
            let revision = self.get(id)?;
            path.push(id);
            cursor = revision.parent();
        }

        if path.last() != Some(&self.root) {
            return Err(VcsError::BrokenHistory(format!(
                "revision {target} does not descend from the root"
            )));
        }

        path.reverse();
        Ok(path)
    }

    /// Whether `ancestor` lies on the root→`descendant` path.
    pub fn is_ancestor(&self, ancestor: Uuid, descendant: Uuid) -> Result<bool, VcsError> {
        Ok(self.ancestry(descendant)?.contains(&ancestor))
    }

    pub fn serialize(&self) -> SerializedNode {
        let mut node = SerializedNode::new(keys::HISTORY).with_attribute(keys::ROOT, self.root);
        for revision in self.iter() {
            node.push_child(revision.serialize());
        }
        node
    }

    pub fn deserialize(
        node: &SerializedNode,
        pack: PackPtr,
        registry: &DiffLogicRegistry,
    ) -> Result<Self, VcsError> {
        let history = node.find(keys::HISTORY)?;
        let root_id = history.require_uuid(keys::ROOT)?;

        let mut revisions = history
            .children
            .iter()
            .map(|child| Revision::deserialize(child, pack.clone(), registry))
            .collect::<Result<Vec<_>, _>>()?;
        // Parents always carry a lower sequence than their children.
        revisions.sort_by_key(|r| r.sequence());

        let root_index = revisions
            .iter()
            .position(|r| r.id() == root_id)
            .ok_or_else(|| VcsError::BrokenHistory(format!("root revision {root_id} missing")))?;
        let root = revisions.remove(root_index);
        if !root.is_root() {
            return Err(VcsError::BrokenHistory(format!("root revision {root_id} has a parent")));
        }

        let mut graph = Self::new(root);
        for revision in revisions {
            graph.insert(revision)?;
        }
        Ok(graph)
    }
}
