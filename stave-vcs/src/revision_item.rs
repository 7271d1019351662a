//! One entity's change inside one revision.
//!
//! ```text
//!  deltas:      [ Δ0 ][ Δ1 ][ Δ2 ]      descriptors, always serialized
//!  deltas_data: [ p0 ][ ·  ][ p2 ]      Some = not yet flushed
//!                  │     │
//!                  │     └── payload_for(1) → pack.create_delta_data_for(id, Δ1)
//!                  └──────── payload_for(0) → p0
//! ```
//!
//! The two vectors always have the same length. `flush_data` moves every
//! in-memory payload into the pack and empties the slot.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::delta::Delta;
use crate::diff_logic::{DeltaWithData, DiffLogic, DiffLogicRegistry};
use crate::error::{PackError, VcsError};
use crate::pack::PackPtr;
use crate::payload::{EntityState, Payload};
use crate::tracked::TrackedItem;
use crate::tree::{keys, SerializedNode};

/// Change kind of a revision item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RevisionItemType {
    Undefined = 0,
    Added = 1,
    Removed = 2,
    Changed = 3,
}

impl RevisionItemType {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Added,
            2 => Self::Removed,
            3 => Self::Changed,
            _ => Self::Undefined,
        }
    }

    /// Human-readable kind, empty for `Undefined`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Changed => "changed",
            Self::Undefined => "",
        }
    }
}

pub struct RevisionItem {
    vcs_id: Uuid,
    description: String,
    item_type: RevisionItemType,
    logic: Arc<dyn DiffLogic>,
    deltas: Vec<Delta>,
    deltas_data: Vec<Option<Payload>>,
    pack: PackPtr,
}

impl RevisionItem {
    /// Record `item` against its last committed state.
    ///
    /// With no previous state the item is `Added` and every facet is copied
    /// verbatim under fresh delta ids. Otherwise the entity's diff logic
    /// produces a `Changed` item; `None` when nothing changed.
    pub fn capture_from(
        pack: PackPtr,
        registry: &DiffLogicRegistry,
        item: &dyn TrackedItem,
        previous: Option<&EntityState>,
    ) -> Result<Option<Self>, VcsError> {
        let logic = registry.create_logic_copy(item)?;
        let current = item.current_state();

        let (item_type, changes) = match previous {
            None => {
                let copies = current
                    .iter()
                    .map(|(kind, payload)| (Delta::new(kind), payload.clone()))
                    .collect();
                (RevisionItemType::Added, copies)
            }
            Some(previous) => {
                let changes = logic.diff(previous, &current)?;
                if changes.is_empty() {
                    return Ok(None);
                }
                (RevisionItemType::Changed, changes)
            }
        };

        Ok(Some(Self::from_deltas(
            pack,
            logic,
            item.vcs_id(),
            item.vcs_name(),
            item_type,
            changes,
        )))
    }

    /// Tombstone for an entity that disappeared. Carries no deltas.
    pub fn removed(
        pack: PackPtr,
        logic: Arc<dyn DiffLogic>,
        vcs_id: Uuid,
        description: impl Into<String>,
    ) -> Self {
        Self::from_deltas(
            pack,
            logic,
            vcs_id,
            description,
            RevisionItemType::Removed,
            Vec::new(),
        )
    }

    /// Item holding the given deltas in memory.
    pub fn from_deltas(
        pack: PackPtr,
        logic: Arc<dyn DiffLogic>,
        vcs_id: Uuid,
        description: impl Into<String>,
        item_type: RevisionItemType,
        changes: Vec<DeltaWithData>,
    ) -> Self {
        let (deltas, deltas_data) = changes
            .into_iter()
            .map(|(delta, data)| (delta, Some(data)))
            .unzip();
        Self {
            vcs_id,
            description: description.into(),
            item_type,
            logic,
            deltas,
            deltas_data,
            pack,
        }
    }

    pub fn vcs_id(&self) -> Uuid {
        self.vcs_id
    }

    pub fn vcs_name(&self) -> &str {
        &self.description
    }

    pub fn item_type(&self) -> RevisionItemType {
        self.item_type
    }

    pub fn type_as_str(&self) -> &'static str {
        self.item_type.as_str()
    }

    pub fn diff_logic(&self) -> &Arc<dyn DiffLogic> {
        &self.logic
    }

    pub fn type_tag(&self) -> &str {
        self.logic.type_tag()
    }

    pub fn pack_ptr(&self) -> PackPtr {
        Arc::clone(&self.pack)
    }

    pub fn num_deltas(&self) -> usize {
        self.deltas.len()
    }

    pub fn delta(&self, index: usize) -> Option<&Delta> {
        self.deltas.get(index)
    }

    pub fn deltas(&self) -> &[Delta] {
        &self.deltas
    }

    /// Whether any payload still lives only in memory.
    pub fn has_pending_data(&self) -> bool {
        self.deltas_data.iter().any(Option::is_some)
    }

    /// Write pending payloads into the pack and clear their slots.
    ///
    /// Returns the number of payloads written. A second call finds nothing
    /// pending and writes nothing.
    pub fn flush_data(&mut self) -> Result<usize, PackError> {
        let mut written = 0;
        for (delta, slot) in self.deltas.iter().zip(self.deltas_data.iter_mut()) {
            if let Some(data) = slot.as_ref() {
                self.pack.set_delta_data_for(self.vcs_id, delta.id(), data)?;
                *slot = None;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Payload of the delta at `index`: in-memory slot first, pack second.
    pub fn payload_for(&self, index: usize) -> Result<Payload, VcsError> {
        let delta = self.deltas.get(index).ok_or_else(|| {
            VcsError::BrokenHistory(format!(
                "delta index {index} out of range for item {} ({} deltas)",
                self.vcs_id,
                self.deltas.len()
            ))
        })?;

        if let Some(Some(data)) = self.deltas_data.get(index) {
            return Ok(data.clone());
        }

        Ok(self.pack.create_delta_data_for(self.vcs_id, delta.id())?)
    }

    /// Every delta with its resolved payload, in order.
    pub fn deltas_with_data(&self) -> Result<Vec<DeltaWithData>, VcsError> {
        self.deltas
            .iter()
            .enumerate()
            .map(|(i, delta)| self.payload_for(i).map(|data| (delta.clone(), data)))
            .collect()
    }

    /// Replace the in-memory payload of the delta with `delta_id`.
    ///
    /// Data may arrive before its descriptor: an unknown id gets a
    /// placeholder delta appended so both sequences stay aligned. The
    /// placeholder has no kind and fails any apply until
    /// [`describe_delta`](Self::describe_delta) fills it in.
    pub fn import_payload(&mut self, data: Payload, delta_id: Uuid) {
        match self.deltas.iter().position(|d| d.id() == delta_id) {
            Some(index) => self.deltas_data[index] = Some(data),
            None => {
                self.deltas.push(Delta::placeholder(delta_id));
                self.deltas_data.push(Some(data));
            }
        }
    }

    /// Attach a descriptor that arrived after its data.
    ///
    /// Fills the placeholder with the same id, or appends the delta with
    /// its payload left to the pack. Returns `false` when a described delta
    /// with that id is already present; it is left untouched.
    pub fn describe_delta(&mut self, delta: Delta) -> bool {
        match self.deltas.iter().position(|d| d.id() == delta.id()) {
            Some(index) if self.deltas[index].is_placeholder() => {
                self.deltas[index] = delta;
                true
            }
            Some(_) => false,
            None => {
                self.deltas.push(delta);
                self.deltas_data.push(None);
                true
            }
        }
    }

    /// Whether some payload still waits for its descriptor.
    pub fn has_placeholders(&self) -> bool {
        self.deltas.iter().any(Delta::is_placeholder)
    }

    /// Metadata only; payloads travel separately.
    pub fn serialize(&self) -> SerializedNode {
        let mut node = SerializedNode::new(keys::REVISION_ITEM)
            .with_attribute(keys::ID, self.vcs_id)
            .with_attribute(keys::ITEM_TYPE, self.item_type.code())
            .with_attribute(keys::NAME, &self.description)
            .with_attribute(keys::DIFF_LOGIC, self.logic.type_tag());

        for delta in &self.deltas {
            node.push_child(delta.serialize());
        }

        node
    }

    /// Rebuild from metadata. The diff logic is resolved strictly from the
    /// stored tag; payloads resolve through the pack afterwards.
    pub fn deserialize(
        node: &SerializedNode,
        pack: PackPtr,
        registry: &DiffLogicRegistry,
    ) -> Result<Self, VcsError> {
        let root = node.find(keys::REVISION_ITEM)?;

        let vcs_id = root.require_uuid(keys::ID)?;
        let description = root.attribute(keys::NAME).unwrap_or_default().to_string();
        let item_type = RevisionItemType::from_code(
            root.integer_or(keys::ITEM_TYPE, RevisionItemType::Undefined.code())?,
        );
        let logic = registry.create_logic_for(root.attribute(keys::DIFF_LOGIC).unwrap_or_default())?;

        let deltas = root
            .children
            .iter()
            .map(Delta::deserialize)
            .collect::<Result<Vec<_>, _>>()?;
        let deltas_data = vec![None; deltas.len()];

        Ok(Self {
            vcs_id,
            description,
            item_type,
            logic,
            deltas,
            deltas_data,
            pack,
        })
    }
}

impl std::fmt::Debug for RevisionItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionItem")
            .field("vcs_id", &self.vcs_id)
            .field("description", &self.description)
            .field("item_type", &self.item_type)
            .field("diff_logic", &self.logic.type_tag())
            .field("deltas", &self.deltas)
            .field("pending", &self.deltas_data.iter().filter(|d| d.is_some()).count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff_logic::FacetDiffLogic;
    use crate::pack::{MemoryPack, Pack};
    use serde_json::json;

    struct Track {
        id: Uuid,
        name: String,
        facets: Vec<(Delta, Payload)>,
    }

    impl Track {
        fn new(name: &str, path: &str, mute: bool) -> Self {
            Self {
                id: Uuid::new_v4(),
                name: name.to_string(),
                facets: vec![
                    (Delta::new("path"), Payload::new(json!(path))),
                    (Delta::new("mute"), Payload::new(json!(mute))),
                ],
            }
        }
    }

    impl TrackedItem for Track {
        fn vcs_id(&self) -> Uuid {
            self.id
        }
        fn vcs_name(&self) -> String {
            self.name.clone()
        }
        fn type_tag(&self) -> &str {
            "track"
        }
        fn num_deltas(&self) -> usize {
            self.facets.len()
        }
        fn delta(&self, index: usize) -> Option<Delta> {
            self.facets.get(index).map(|(d, _)| d.clone())
        }
        fn serialize_delta_data(&self, index: usize) -> Option<Payload> {
            self.facets.get(index).map(|(_, p)| p.clone())
        }
    }

    fn registry() -> DiffLogicRegistry {
        DiffLogicRegistry::new().with(FacetDiffLogic::with_schema("track", &["path", "mute"]))
    }

    #[test]
    fn test_capture_added_copies_all_facets() {
        let pack = MemoryPack::shared();
        let track = Track::new("Piano", "/Piano", false);

        let item = RevisionItem::capture_from(pack, &registry(), &track, None)
            .unwrap()
            .unwrap();

        assert_eq!(item.item_type(), RevisionItemType::Added);
        assert_eq!(item.type_as_str(), "added");
        assert_eq!(item.vcs_name(), "Piano");
        assert_eq!(item.num_deltas(), 2);
        assert!(item.has_pending_data());
        assert_eq!(item.payload_for(0).unwrap().value(), &json!("/Piano"));
    }

    #[test]
    fn test_capture_changed_and_unchanged() {
        let pack = MemoryPack::shared();
        let mut track = Track::new("Piano", "/Piano", false);
        let previous = track.current_state();

        let unchanged =
            RevisionItem::capture_from(pack.clone(), &registry(), &track, Some(&previous)).unwrap();
        assert!(unchanged.is_none());

        track.facets[1].1 = Payload::new(json!(true));
        let changed = RevisionItem::capture_from(pack, &registry(), &track, Some(&previous))
            .unwrap()
            .unwrap();
        assert_eq!(changed.item_type(), RevisionItemType::Changed);
        assert_eq!(changed.num_deltas(), 1);
        assert_eq!(changed.delta(0).unwrap().kind(), "mute");
    }

    #[test]
    fn test_flush_moves_data_to_pack() {
        let memory = Arc::new(MemoryPack::new());
        let pack: PackPtr = memory.clone();
        let track = Track::new("Bass", "/Bass", true);
        let mut item = RevisionItem::capture_from(pack, &registry(), &track, None)
            .unwrap()
            .unwrap();

        assert_eq!(item.flush_data().unwrap(), 2);
        assert!(!item.has_pending_data());
        assert_eq!(memory.len(), 2);
        assert_eq!(item.payload_for(1).unwrap().value(), &json!(true));

        // Second flush is a no-op.
        assert_eq!(item.flush_data().unwrap(), 0);
        assert_eq!(memory.write_count(), 2);
    }

    #[test]
    fn test_payload_missing_everywhere_is_not_found() {
        let pack = MemoryPack::shared();
        let track = Track::new("Lead", "/Lead", false);
        let item = RevisionItem::capture_from(pack.clone(), &registry(), &track, None)
            .unwrap()
            .unwrap();

        // Metadata-only copy: nothing in memory, nothing in the pack.
        let restored = RevisionItem::deserialize(&item.serialize(), pack, &registry()).unwrap();
        let err = restored.payload_for(0).unwrap_err();
        assert!(matches!(err, VcsError::NotFound { .. }));
        assert!(matches!(
            restored.payload_for(5),
            Err(VcsError::BrokenHistory(_))
        ));
    }

    #[test]
    fn test_serialize_round_trip_preserves_delta_order() {
        let pack = MemoryPack::shared();
        let track = Track::new("Drums", "/Drums", false);
        let mut item = RevisionItem::capture_from(pack.clone(), &registry(), &track, None)
            .unwrap()
            .unwrap();
        item.flush_data().unwrap();

        let node = item.serialize();
        assert_eq!(node.attribute(keys::DIFF_LOGIC), Some("track"));

        let restored = RevisionItem::deserialize(&node, pack, &registry()).unwrap();
        assert_eq!(restored.vcs_id(), item.vcs_id());
        assert_eq!(restored.vcs_name(), "Drums");
        assert_eq!(restored.item_type(), RevisionItemType::Added);
        assert_eq!(restored.deltas(), item.deltas());
        assert_eq!(restored.payload_for(0).unwrap().value(), &json!("/Drums"));
    }

    #[test]
    fn test_deserialize_unknown_or_missing_logic_is_fatal() {
        let pack = MemoryPack::shared();
        let node = SerializedNode::new(keys::REVISION_ITEM)
            .with_attribute(keys::ID, Uuid::new_v4())
            .with_attribute(keys::ITEM_TYPE, 1)
            .with_attribute(keys::DIFF_LOGIC, "sampler");
        assert!(matches!(
            RevisionItem::deserialize(&node, pack.clone(), &registry()),
            Err(VcsError::SchemaViolation(_))
        ));

        let missing = SerializedNode::new(keys::REVISION_ITEM).with_attribute(keys::ID, Uuid::new_v4());
        assert!(matches!(
            RevisionItem::deserialize(&missing, pack, &registry()),
            Err(VcsError::SchemaViolation(_))
        ));
    }

    #[test]
    fn test_import_payload_existing_and_placeholder() {
        let pack = MemoryPack::shared();
        let track = Track::new("Keys", "/Keys", false);
        let mut item = RevisionItem::capture_from(pack.clone(), &registry(), &track, None)
            .unwrap()
            .unwrap();
        item.flush_data().unwrap();

        let metadata = item.serialize();
        let mut remote = RevisionItem::deserialize(&metadata, MemoryPack::shared(), &registry()).unwrap();

        let path_id = remote.delta(0).unwrap().id();
        remote.import_payload(Payload::new(json!("/Remote")), path_id);
        assert_eq!(remote.payload_for(0).unwrap().value(), &json!("/Remote"));
        assert_eq!(remote.num_deltas(), 2);

        let orphan = Uuid::new_v4();
        remote.import_payload(Payload::new(json!(1)), orphan);
        assert_eq!(remote.num_deltas(), 3);
        assert!(remote.delta(2).unwrap().is_placeholder());
        assert_eq!(remote.payload_for(2).unwrap().value(), &json!(1));
    }

    #[test]
    fn test_late_descriptor_fills_placeholder() {
        let logic = registry().create_logic_for("track").unwrap();
        let mut item = RevisionItem::from_deltas(
            MemoryPack::shared(),
            logic.clone(),
            Uuid::new_v4(),
            "Keys",
            RevisionItemType::Added,
            Vec::new(),
        );

        let mute = Delta::new("mute");
        item.import_payload(Payload::new(json!(true)), mute.id());
        assert!(item.has_placeholders());
        let early = item.deltas_with_data().unwrap();
        assert!(logic.apply(&EntityState::new(), &early).is_err());

        assert!(item.describe_delta(mute.clone()));
        assert!(!item.has_placeholders());
        assert!(!item.describe_delta(mute));
        assert_eq!(item.num_deltas(), 1);

        let state = logic.apply(&EntityState::new(), &item.deltas_with_data().unwrap()).unwrap();
        assert_eq!(state.get("mute").unwrap().value(), &json!(true));
    }

    #[test]
    fn test_removed_item_has_no_deltas() {
        let pack = MemoryPack::shared();
        let logic = registry().create_logic_for("track").unwrap();
        let id = Uuid::new_v4();
        let mut item = RevisionItem::removed(pack.clone(), logic, id, "Old track");

        assert_eq!(item.item_type(), RevisionItemType::Removed);
        assert_eq!(item.num_deltas(), 0);
        assert_eq!(item.flush_data().unwrap(), 0);
        assert!(!pack.contains_delta_data(id, Uuid::new_v4()).unwrap());
    }
}
