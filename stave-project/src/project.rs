use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use stave_vcs::{EntityState, TrackedItem, TrackedItemsSource, VcsError};
use uuid::Uuid;

use crate::entity::{type_tags, Entity, ProjectInfo, ProjectTimeline, Track};
use crate::error::ProjectError;

/// A music project: the document the version control observes.
///
/// Entities live behind one reader/writer lock. Edits take it exclusively;
/// commits and status checks share it.
#[derive(Debug)]
pub struct Project {
    pub id: Uuid,
    entities: Arc<RwLock<Vec<Entity>>>,
    resets: AtomicUsize,
}

impl Project {
    /// New project with its info and timeline entities.
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        let project = Self::empty();
        if let Ok(mut entities) = project.entities.write() {
            entities.push(Entity::Info(ProjectInfo::new(title, author)));
            entities.push(Entity::Timeline(ProjectTimeline::new()));
        }
        project
    }

    /// Project without any entity, for restoring from history.
    pub fn empty() -> Self {
        Self {
            id: Uuid::new_v4(),
            entities: Arc::new(RwLock::new(Vec::new())),
            resets: AtomicUsize::new(0),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<Entity>>, ProjectError> {
        self.entities.read().map_err(|_| ProjectError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<Entity>>, ProjectError> {
        self.entities.write().map_err(|_| ProjectError::Poisoned)
    }

    pub fn len(&self) -> Result<usize, ProjectError> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, ProjectError> {
        Ok(self.read()?.is_empty())
    }

    /// Number of times history rewrote this project.
    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::Relaxed)
    }

    /// Adds a track. Thread-safe.
    pub fn add_track(&self, track: Track) -> Result<Uuid, ProjectError> {
        let id = track.id;
        self.write()?.push(Entity::Track(track));
        Ok(id)
    }

    pub fn remove_track(&self, id: Uuid) -> Result<bool, ProjectError> {
        let mut entities = self.write()?;
        let before = entities.len();
        entities.retain(|e| !matches!(e, Entity::Track(t) if t.id == id));
        Ok(entities.len() != before)
    }

    pub fn update_track<R>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Track) -> R,
    ) -> Result<R, ProjectError> {
        let mut entities = self.write()?;
        entities
            .iter_mut()
            .find_map(|e| match e {
                Entity::Track(track) if track.id == id => Some(track),
                _ => None,
            })
            .map(f)
            .ok_or(ProjectError::UnknownEntity(id))
    }

    pub fn update_info<R>(&self, f: impl FnOnce(&mut ProjectInfo) -> R) -> Result<R, ProjectError> {
        let mut entities = self.write()?;
        entities
            .iter_mut()
            .find_map(|e| match e {
                Entity::Info(info) => Some(info),
                _ => None,
            })
            .map(f)
            .ok_or(ProjectError::Missing(type_tags::PROJECT_INFO))
    }

    pub fn update_timeline<R>(
        &self,
        f: impl FnOnce(&mut ProjectTimeline) -> R,
    ) -> Result<R, ProjectError> {
        let mut entities = self.write()?;
        entities
            .iter_mut()
            .find_map(|e| match e {
                Entity::Timeline(timeline) => Some(timeline),
                _ => None,
            })
            .map(f)
            .ok_or(ProjectError::Missing(type_tags::PROJECT_TIMELINE))
    }

    pub fn info(&self) -> Result<Option<ProjectInfo>, ProjectError> {
        Ok(self.read()?.iter().find_map(|e| match e {
            Entity::Info(info) => Some(info.clone()),
            _ => None,
        }))
    }

    pub fn timeline(&self) -> Result<Option<ProjectTimeline>, ProjectError> {
        Ok(self.read()?.iter().find_map(|e| match e {
            Entity::Timeline(timeline) => Some(timeline.clone()),
            _ => None,
        }))
    }

    pub fn track(&self, id: Uuid) -> Result<Option<Track>, ProjectError> {
        Ok(self.tracks()?.into_iter().find(|t| t.id == id))
    }

    /// Tracks sorted by path.
    pub fn tracks(&self) -> Result<Vec<Track>, ProjectError> {
        let mut tracks: Vec<Track> = self
            .read()?
            .iter()
            .filter_map(|e| match e {
                Entity::Track(track) => Some(track.clone()),
                _ => None,
            })
            .collect();
        tracks.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(tracks)
    }
}

impl TrackedItemsSource for Project {
    fn vcs_name(&self) -> String {
        self.info()
            .ok()
            .flatten()
            .map(|info| info.title)
            .unwrap_or_else(|| self.id.to_string())
    }

    fn visit_tracked_items(
        &self,
        visitor: &mut dyn FnMut(&dyn TrackedItem),
    ) -> Result<(), VcsError> {
        for entity in self.read()?.iter() {
            visitor(entity);
        }
        Ok(())
    }

    fn restore_tracked_item(
        &self,
        type_tag: &str,
        id: Uuid,
        _name: &str,
        state: &EntityState,
    ) -> Result<(), VcsError> {
        let restored = Entity::from_state(type_tag, id, state)?;
        let mut entities = self.write()?;
        match entities.iter_mut().find(|e| e.id() == id) {
            Some(slot) => *slot = restored,
            None => {
                log::debug!("Creating {type_tag} {id} from history");
                entities.push(restored);
            }
        }
        Ok(())
    }

    fn delete_tracked_item(&self, id: Uuid) -> Result<bool, VcsError> {
        let mut entities = self.write()?;
        let before = entities.len();
        entities.retain(|e| e.id() != id);
        Ok(entities.len() != before)
    }

    fn on_reset_state(&self) {
        let count = self.resets.fetch_add(1, Ordering::Relaxed) + 1;
        log::debug!("Project {} reset from history ({count})", self.id);
    }
}
