//! Project history integration tests.
//!
//! Verifies:
//! - Event edits are stored as event-level deltas
//! - Undo/redo rewrite the project, including deleted and recreated tracks
//! - A project restored from a RocksDB pack matches the saved one

use std::sync::Arc;

use stave_project::{default_registry, facets, Event, Project, Track};
use stave_store::{open_version_control, save_version_control, RocksPack, StoreConfig};
use stave_vcs::{EntityChange, MemoryPack, RevisionItemType, VcsConfig, VersionControl};
use tempfile::tempdir;

fn vcs() -> VersionControl {
    VersionControl::new(
        VcsConfig::for_testing(),
        Arc::new(default_registry()),
        MemoryPack::shared(),
    )
}

fn sketch() -> (Project, uuid::Uuid) {
    let project = Project::new("Sketch", "anon");
    let mut piano = Track::piano("/Piano", "grand");
    for step in 0..16 {
        piano.add_event(Event::note(step as f64, 60 + step % 12, 1.0, 0.8));
    }
    let id = project.add_track(piano).unwrap();
    (project, id)
}

#[test]
fn test_note_edit_is_event_level() {
    let vcs = vcs();
    let (project, piano) = sketch();
    let first = vcs.commit(&project, "initial").unwrap();
    assert_eq!(first.changes.len(), 3);
    assert!(first
        .changes
        .iter()
        .all(|c| c.item_type == RevisionItemType::Added));

    let note = project.track(piano).unwrap().unwrap().events[3].id;
    project
        .update_track(piano, |t| t.update_event(note, |e| e.beat = 3.5))
        .unwrap()
        .unwrap();

    let pending = vcs.status(&project).unwrap();
    assert_eq!(pending.len(), 1);
    let kinds: Vec<&str> = pending[0].deltas().iter().map(|d| d.kind()).collect();
    assert_eq!(kinds, vec!["events.changed"]);

    let second = vcs.commit(&project, "nudge").unwrap();
    assert_eq!(second.changes[0].item_type, RevisionItemType::Changed);

    let events = vcs
        .payload_at(second.id, piano, facets::EVENTS)
        .unwrap()
        .unwrap();
    let restored: Vec<Event> = serde_json::from_value(events.into_value()).unwrap();
    assert_eq!(restored, project.track(piano).unwrap().unwrap().events);
}

#[test]
fn test_undo_redo_track_lifecycle() {
    let vcs = vcs();
    let (project, piano) = sketch();
    vcs.commit(&project, "initial").unwrap();

    let bass = project.add_track(Track::automation("/Bass/Cutoff", 74)).unwrap();
    project
        .update_track(bass, |t| t.add_event(Event::automation(0.0, 0.25, 0.5)))
        .unwrap();
    project.remove_track(piano).unwrap();
    project.update_info(|info| info.license = "CC-BY".into()).unwrap();
    let after = vcs.commit(&project, "swap tracks").unwrap();

    assert_eq!(vcs.undo(&project).unwrap(), Some(after.parent.unwrap()));
    assert!(project.track(bass).unwrap().is_none());
    assert_eq!(project.track(piano).unwrap().unwrap().events.len(), 16);
    assert!(project.info().unwrap().unwrap().license.is_empty());

    assert_eq!(vcs.redo(&project).unwrap(), Some(after.id));
    assert!(project.track(piano).unwrap().is_none());
    let cutoff = project.track(bass).unwrap().unwrap();
    assert_eq!(cutoff.controller, Some(74));
    assert_eq!(cutoff.events.len(), 1);
    assert_eq!(project.info().unwrap().unwrap().license, "CC-BY");
    assert_eq!(project.reset_count(), 2);
}

#[test]
fn test_timeline_and_revision_diff() {
    let vcs = vcs();
    let (project, piano) = sketch();
    let base = vcs.commit(&project, "initial").unwrap();

    project
        .update_timeline(|t| {
            t.add_time_signature(Event::time_signature(0.0, 3, 4));
            t.add_annotation(Event::annotation(8.0, "Chorus", "#ffcc00"));
        })
        .unwrap();
    project.update_track(piano, |t| t.mute = true).unwrap();
    let edited = vcs.commit(&project, "chorus").unwrap();

    let changes = vcs.diff_revisions(base.id, edited.id).unwrap();
    assert_eq!(changes.len(), 2);
    let piano_change = changes.iter().find(|(id, _)| *id == piano).unwrap();
    assert_eq!(
        piano_change.1,
        EntityChange::Changed {
            facets: vec![facets::TRACK_MUTE.to_string()]
        }
    );
}

#[test]
fn test_restore_project_from_rocks() {
    let dir = tempdir().unwrap();
    let (project, piano) = sketch();
    project
        .update_timeline(|t| t.add_key_signature(Event::key_signature(0.0, 9, "aeolian")))
        .unwrap();

    {
        let pack = Arc::new(RocksPack::open(StoreConfig::for_testing(dir.path())).unwrap());
        let vcs =
            open_version_control(pack.clone(), VcsConfig::default(), Arc::new(default_registry()))
                .unwrap();
        vcs.commit(&project, "initial").unwrap();
        project
            .update_track(piano, |t| {
                let first = t.events[0].id;
                t.remove_event(first);
                t.add_event(Event::note(32.0, 72, 2.0, 1.0));
            })
            .unwrap();
        vcs.commit(&project, "rework").unwrap();
        save_version_control(&vcs, &pack).unwrap();
    }

    let pack = Arc::new(RocksPack::open(StoreConfig::for_testing(dir.path())).unwrap());
    let vcs = open_version_control(pack, VcsConfig::default(), Arc::new(default_registry())).unwrap();
    let head = vcs.head().unwrap();

    let restored = Project::empty();
    vcs.reset_to(head, &restored).unwrap();
    assert_eq!(restored.info().unwrap(), project.info().unwrap());
    assert_eq!(restored.timeline().unwrap(), project.timeline().unwrap());
    assert_eq!(restored.tracks().unwrap(), project.tracks().unwrap());
    assert!(vcs.status(&restored).unwrap().is_empty());
}
