//! # stave-project — Music project document under version control
//!
//! ```text
//! Project (RwLock<Vec<Entity>>) ── TrackedItemsSource ──► VersionControl
//!   ├── Entity::Info      projectInfo      FacetDiffLogic
//!   ├── Entity::Timeline  projectTimeline  SequenceDiffLogic
//!   └── Entity::Track     pianoTrack       SequenceDiffLogic
//!                         automationTrack  SequenceDiffLogic
//! ```

pub mod entity;
pub mod error;
pub mod event;
pub mod project;
pub mod sequence;

pub use entity::{facets, type_tags, Entity, ProjectInfo, ProjectTimeline, Track, TrackKind};
pub use error::ProjectError;
pub use event::{sort_events, Event, EventKind};
pub use project::Project;
pub use sequence::SequenceDiffLogic;

use stave_vcs::{DiffLogicRegistry, FacetDiffLogic};

/// Diff strategies for every entity kind a [`Project`] holds.
pub fn default_registry() -> DiffLogicRegistry {
    DiffLogicRegistry::new()
        .with(FacetDiffLogic::with_schema(
            type_tags::PROJECT_INFO,
            facets::INFO,
        ))
        .with(SequenceDiffLogic::new(
            type_tags::PROJECT_TIMELINE,
            &[],
            facets::TIMELINE,
        ))
        .with(SequenceDiffLogic::new(
            type_tags::PIANO_TRACK,
            facets::TRACK_SCALARS,
            &[facets::EVENTS],
        ))
        .with(SequenceDiffLogic::new(
            type_tags::AUTOMATION_TRACK,
            facets::TRACK_SCALARS,
            &[facets::EVENTS],
        ))
}
