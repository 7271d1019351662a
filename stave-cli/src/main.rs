//! Stave CLI — scripted editing session against a RocksDB history.
//!
//! ```text
//! stave-cli [DB_PATH]
//! ```
//!
//! Opens (or creates) the pack at `DB_PATH`, restores the saved history,
//! edits a few tracks with commits, undo and redo in between, saves, and
//! prints the history of the current head. Set `RUST_LOG=debug` to follow
//! the engine.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use stave_project::{default_registry, Event, Project, Track};
use stave_store::{open_version_control, save_version_control, RocksPack, StoreConfig};
use stave_vcs::{VcsConfig, VersionControl};

fn restore_project(vcs: &VersionControl) -> Result<Project, Box<dyn Error>> {
    let head = vcs.head()?;
    if head == vcs.root()? {
        info!("Empty history, starting a new project");
        return Ok(Project::new("Untitled", "stave"));
    }
    let project = Project::empty();
    vcs.reset_to(head, &project)?;
    info!("Restored project at {head}");
    Ok(project)
}

fn run(path: PathBuf) -> Result<(), Box<dyn Error>> {
    let pack = Arc::new(RocksPack::open(StoreConfig::at(path.clone()))?);
    let vcs = open_version_control(pack.clone(), VcsConfig::default(), Arc::new(default_registry()))?;
    let project = restore_project(&vcs)?;

    let take = project.tracks()?.len() + 1;

    let mut piano = Track::piano(format!("/Piano {take}"), "grand");
    for (step, key) in [60, 64, 67, 72].into_iter().enumerate() {
        piano.add_event(Event::note(step as f64, key, 1.0, 0.8));
    }
    let piano = project.add_track(piano)?;
    vcs.commit(&project, &format!("Add piano take {take}"))?;

    let mut cutoff = Track::automation(format!("/Cutoff {take}"), 74);
    cutoff.add_event(Event::automation(0.0, 0.2, 0.0));
    cutoff.add_event(Event::automation(4.0, 0.9, 0.5));
    let cutoff = project.add_track(cutoff)?;
    vcs.commit(&project, "Add cutoff automation")?;

    project.update_track(piano, |t| {
        t.colour = "#3399ff".to_string();
        if let Some(last) = t.events.last().map(|e| e.id) {
            t.remove_event(last);
        }
        t.add_event(Event::note(3.5, 71, 0.5, 0.6));
    })?;
    project.update_timeline(|t| t.add_annotation(Event::annotation(0.0, "Intro", "#ffcc00")))?;
    vcs.commit(&project, "Rework ending")?;

    project.remove_track(cutoff)?;
    vcs.commit(&project, "Drop cutoff")?;

    if let Some(head) = vcs.undo(&project)? {
        println!("undo  -> {head} ({} tracks)", project.tracks()?.len());
    }
    if let Some(head) = vcs.redo(&project)? {
        println!("redo  -> {head} ({} tracks)", project.tracks()?.len());
    }

    let flushed = save_version_control(&vcs, &pack)?;
    info!("Saved history to {} ({flushed} payloads flushed)", path.display());

    if let Ok(meta) = pack.metadata() {
        println!(
            "pack: {} deltas, {} bytes raw, ratio {:.2}",
            meta.delta_count,
            meta.raw_bytes,
            meta.compression_ratio()
        );
    }
    println!();
    for summary in vcs.history()? {
        println!("{summary}");
    }
    Ok(())
}

fn main() {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| StoreConfig::default().path);
    info!("Starting Stave CLI on {}", path.display());

    if let Err(e) = run(path) {
        log::error!("Session failed: {e}");
        std::process::exit(1);
    }
}
