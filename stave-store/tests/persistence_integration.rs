//! Persistence integration tests.
//!
//! Verifies:
//! - History survives closing and reopening the database
//! - Payloads written by one session resolve in the next
//! - Pruned payloads surface as recoverable NotFound errors
//! - Pruning a removed entity leaves the head restorable

use std::sync::{Arc, RwLock};

use serde_json::json;
use stave_store::{open_version_control, save_version_control, RocksPack, StoreConfig};
use stave_vcs::{
    Delta, DiffLogicRegistry, EntityState, FacetDiffLogic, Payload, TrackedItem,
    TrackedItemsSource, VcsConfig, VcsError,
};
use tempfile::tempdir;
use uuid::Uuid;

// ─── Helpers ─────────────────────────────────────────────────────────────────

struct Clip {
    id: Uuid,
    facets: Vec<(String, Payload)>,
}

impl TrackedItem for Clip {
    fn vcs_id(&self) -> Uuid {
        self.id
    }
    fn vcs_name(&self) -> String {
        "clip".into()
    }
    fn type_tag(&self) -> &str {
        "clip"
    }
    fn num_deltas(&self) -> usize {
        self.facets.len()
    }
    fn delta(&self, index: usize) -> Option<Delta> {
        self.facets.get(index).map(|(k, _)| Delta::new(k.as_str()))
    }
    fn serialize_delta_data(&self, index: usize) -> Option<Payload> {
        self.facets.get(index).map(|(_, p)| p.clone())
    }
}

#[derive(Default)]
struct Board {
    clips: RwLock<Vec<Clip>>,
}

impl Board {
    fn add(&self, label: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.clips.write().unwrap().push(Clip {
            id,
            facets: vec![("label".into(), Payload::new(json!(label)))],
        });
        id
    }

    fn relabel(&self, id: Uuid, label: &str) {
        let mut clips = self.clips.write().unwrap();
        let clip = clips.iter_mut().find(|c| c.id == id).unwrap();
        clip.facets[0].1 = Payload::new(json!(label));
    }

    fn remove(&self, id: Uuid) {
        self.clips.write().unwrap().retain(|c| c.id != id);
    }

    fn label(&self, id: Uuid) -> Option<String> {
        let clips = self.clips.read().unwrap();
        let clip = clips.iter().find(|c| c.id == id)?;
        clip.facets[0].1.value().as_str().map(str::to_string)
    }
}

impl TrackedItemsSource for Board {
    fn vcs_name(&self) -> String {
        "board".into()
    }

    fn visit_tracked_items(
        &self,
        visitor: &mut dyn FnMut(&dyn TrackedItem),
    ) -> Result<(), VcsError> {
        for clip in self.clips.read().map_err(|_| VcsError::Poisoned)?.iter() {
            visitor(clip);
        }
        Ok(())
    }

    fn restore_tracked_item(
        &self,
        _type_tag: &str,
        id: Uuid,
        _name: &str,
        state: &EntityState,
    ) -> Result<(), VcsError> {
        let mut clips = self.clips.write().map_err(|_| VcsError::Poisoned)?;
        let facets: Vec<(String, Payload)> =
            state.iter().map(|(k, p)| (k.to_string(), p.clone())).collect();
        match clips.iter_mut().find(|c| c.id == id) {
            Some(clip) => clip.facets = facets,
            None => clips.push(Clip { id, facets }),
        }
        Ok(())
    }

    fn delete_tracked_item(&self, id: Uuid) -> Result<bool, VcsError> {
        let mut clips = self.clips.write().map_err(|_| VcsError::Poisoned)?;
        let before = clips.len();
        clips.retain(|c| c.id != id);
        Ok(before != clips.len())
    }
}

fn registry() -> Arc<DiffLogicRegistry> {
    Arc::new(DiffLogicRegistry::new().with(FacetDiffLogic::new("clip")))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[test]
fn test_history_survives_reopen() {
    let dir = tempdir().unwrap();
    let board = Board::default();
    let clip = board.add("intro");

    let (first, second) = {
        let pack = Arc::new(RocksPack::open(StoreConfig::for_testing(dir.path())).unwrap());
        let vcs = open_version_control(pack.clone(), VcsConfig::default(), registry()).unwrap();
        let first = vcs.commit(&board, "add intro").unwrap();
        board.relabel(clip, "verse");
        let second = vcs.commit(&board, "relabel").unwrap();
        save_version_control(&vcs, &pack).unwrap();
        (first.id, second.id)
    };

    let pack = Arc::new(RocksPack::open(StoreConfig::for_testing(dir.path())).unwrap());
    let vcs = open_version_control(pack, VcsConfig::default(), registry()).unwrap();
    assert_eq!(vcs.head().unwrap(), second);
    assert_eq!(vcs.history().unwrap().len(), 3);

    let fresh = Board::default();
    vcs.reset_to(first, &fresh).unwrap();
    assert_eq!(fresh.label(clip).as_deref(), Some("intro"));
    assert!(!vcs.can_redo().unwrap());

    vcs.reset_to(second, &fresh).unwrap();
    assert_eq!(fresh.label(clip).as_deref(), Some("verse"));
}

#[test]
fn test_deferred_flush_is_persisted_on_save() {
    let dir = tempdir().unwrap();
    let board = Board::default();
    board.add("a");
    board.add("b");

    let config = VcsConfig {
        flush_on_commit: false,
        ..VcsConfig::default()
    };
    let pack = Arc::new(RocksPack::open(StoreConfig::for_testing(dir.path())).unwrap());
    let vcs = open_version_control(pack.clone(), config, registry()).unwrap();
    vcs.commit(&board, "two clips").unwrap();
    assert_eq!(pack.metadata().unwrap().delta_count, 0);

    assert_eq!(save_version_control(&vcs, &pack).unwrap(), 2);
    assert_eq!(pack.metadata().unwrap().delta_count, 2);
    assert_eq!(save_version_control(&vcs, &pack).unwrap(), 0);
}

#[test]
fn test_pruned_entity_is_not_found() {
    let dir = tempdir().unwrap();
    let board = Board::default();
    let clip = board.add("doomed");

    {
        let pack = Arc::new(RocksPack::open(StoreConfig::for_testing(dir.path())).unwrap());
        let vcs = open_version_control(pack.clone(), VcsConfig::default(), registry()).unwrap();
        vcs.commit(&board, "add").unwrap();
        save_version_control(&vcs, &pack).unwrap();
        assert_eq!(pack.remove_entity(clip).unwrap(), 1);
    }

    let pack = Arc::new(RocksPack::open(StoreConfig::for_testing(dir.path())).unwrap());
    let vcs = open_version_control(pack, VcsConfig::default(), registry()).unwrap();
    let err = vcs.checkout(vcs.head().unwrap()).unwrap_err();
    assert!(matches!(err, VcsError::NotFound { .. }));
    assert!(err.is_recoverable());
}

#[test]
fn test_pruned_removed_clip_reopens() {
    let dir = tempdir().unwrap();
    let board = Board::default();
    let doomed = board.add("doomed");
    let kept = board.add("kept");

    {
        let pack = Arc::new(RocksPack::open(StoreConfig::for_testing(dir.path())).unwrap());
        let vcs = open_version_control(pack.clone(), VcsConfig::default(), registry()).unwrap();
        vcs.commit(&board, "add").unwrap();
        board.remove(doomed);
        vcs.commit(&board, "drop doomed").unwrap();
        save_version_control(&vcs, &pack).unwrap();
        assert_eq!(pack.remove_entity(doomed).unwrap(), 1);
    }

    let pack = Arc::new(RocksPack::open(StoreConfig::for_testing(dir.path())).unwrap());
    let vcs = open_version_control(pack, VcsConfig::default(), registry()).unwrap();
    let restored = Board::default();
    vcs.reset_to(vcs.head().unwrap(), &restored).unwrap();
    assert_eq!(restored.label(kept).as_deref(), Some("kept"));
    assert_eq!(restored.label(doomed), None);
}
