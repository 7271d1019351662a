//! Project entities and their facet mapping.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stave_vcs::{Delta, EntityState, Payload, TrackedItem};
use uuid::Uuid;

use crate::error::ProjectError;
use crate::event::{sort_events, Event};

/// Entity type tags, as stored in revision items.
pub mod type_tags {
    pub const PROJECT_INFO: &str = "projectInfo";
    pub const PROJECT_TIMELINE: &str = "projectTimeline";
    pub const PIANO_TRACK: &str = "pianoTrack";
    pub const AUTOMATION_TRACK: &str = "automationTrack";
}

/// Facet names, as stored in deltas.
pub mod facets {
    pub const PROJECT_TITLE: &str = "projectTitle";
    pub const PROJECT_AUTHOR: &str = "projectAuthor";
    pub const PROJECT_LICENSE: &str = "projectLicense";
    pub const PROJECT_DESCRIPTION: &str = "projectDescription";

    pub const ANNOTATIONS: &str = "annotations";
    pub const KEY_SIGNATURES: &str = "keySignatures";
    pub const TIME_SIGNATURES: &str = "timeSignatures";

    pub const TRACK_PATH: &str = "trackPath";
    pub const TRACK_MUTE: &str = "trackMute";
    pub const TRACK_COLOUR: &str = "trackColour";
    pub const TRACK_INSTRUMENT: &str = "trackInstrument";
    pub const TRACK_CONTROLLER: &str = "trackController";
    pub const EVENTS: &str = "events";

    pub const INFO: &[&str] = &[
        PROJECT_TITLE,
        PROJECT_AUTHOR,
        PROJECT_LICENSE,
        PROJECT_DESCRIPTION,
    ];
    pub const TIMELINE: &[&str] = &[ANNOTATIONS, KEY_SIGNATURES, TIME_SIGNATURES];
    pub const TRACK_SCALARS: &[&str] = &[
        TRACK_PATH,
        TRACK_MUTE,
        TRACK_COLOUR,
        TRACK_INSTRUMENT,
        TRACK_CONTROLLER,
    ];
    pub const TRACK: &[&str] = &[
        TRACK_PATH,
        TRACK_MUTE,
        TRACK_COLOUR,
        TRACK_INSTRUMENT,
        TRACK_CONTROLLER,
        EVENTS,
    ];
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct ProjectInfo {
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub license: String,
    pub description: String,
}

impl ProjectInfo {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            author: author.into(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct ProjectTimeline {
    pub id: Uuid,
    pub annotations: Vec<Event>,
    pub key_signatures: Vec<Event>,
    pub time_signatures: Vec<Event>,
}

impl ProjectTimeline {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            ..Self::default()
        }
    }

    pub fn add_annotation(&mut self, event: Event) -> Uuid {
        push_sorted(&mut self.annotations, event)
    }

    pub fn add_key_signature(&mut self, event: Event) -> Uuid {
        push_sorted(&mut self.key_signatures, event)
    }

    pub fn add_time_signature(&mut self, event: Event) -> Uuid {
        push_sorted(&mut self.time_signatures, event)
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum TrackKind {
    Piano,
    Automation,
}

impl TrackKind {
    pub fn type_tag(self) -> &'static str {
        match self {
            TrackKind::Piano => type_tags::PIANO_TRACK,
            TrackKind::Automation => type_tags::AUTOMATION_TRACK,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Track {
    pub id: Uuid,
    pub kind: TrackKind,
    pub path: String,
    pub mute: bool,
    pub colour: String,
    pub instrument: String,
    pub controller: Option<u32>,
    pub events: Vec<Event>,
}

impl Track {
    pub fn piano(path: impl Into<String>, instrument: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: TrackKind::Piano,
            path: path.into(),
            mute: false,
            colour: "#ffffff".to_string(),
            instrument: instrument.into(),
            controller: None,
            events: Vec::new(),
        }
    }

    pub fn automation(path: impl Into<String>, controller: u32) -> Self {
        Self {
            kind: TrackKind::Automation,
            controller: Some(controller),
            ..Self::piano(path, "")
        }
    }

    /// Insert keeping playback order. Returns the event id.
    pub fn add_event(&mut self, event: Event) -> Uuid {
        push_sorted(&mut self.events, event)
    }

    pub fn remove_event(&mut self, id: Uuid) -> Option<Event> {
        let index = self.events.iter().position(|e| e.id == id)?;
        Some(self.events.remove(index))
    }

    /// Edit one event, then restore playback order.
    pub fn update_event<R>(
        &mut self,
        id: Uuid,
        f: impl FnOnce(&mut Event) -> R,
    ) -> Result<R, ProjectError> {
        let event = self
            .events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(ProjectError::UnknownEvent {
                entity_id: self.id,
                event_id: id,
            })?;
        let result = f(event);
        sort_events(&mut self.events);
        Ok(result)
    }
}

fn push_sorted(events: &mut Vec<Event>, event: Event) -> Uuid {
    let id = event.id;
    let at = events.partition_point(|e| e.order(&event).is_lt());
    events.insert(at, event);
    id
}

/// Any versioned part of a project.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub enum Entity {
    Info(ProjectInfo),
    Timeline(ProjectTimeline),
    Track(Track),
}

impl Entity {
    pub fn id(&self) -> Uuid {
        match self {
            Entity::Info(info) => info.id,
            Entity::Timeline(timeline) => timeline.id,
            Entity::Track(track) => track.id,
        }
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            Entity::Info(_) => type_tags::PROJECT_INFO,
            Entity::Timeline(_) => type_tags::PROJECT_TIMELINE,
            Entity::Track(track) => track.kind.type_tag(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Entity::Info(info) => info.title.clone(),
            Entity::Timeline(_) => "Timeline".to_string(),
            Entity::Track(track) => track.path.clone(),
        }
    }

    pub fn facet_names(&self) -> &'static [&'static str] {
        match self {
            Entity::Info(_) => facets::INFO,
            Entity::Timeline(_) => facets::TIMELINE,
            Entity::Track(_) => facets::TRACK,
        }
    }

    pub fn facet_value(&self, facet: &str) -> Option<Value> {
        match self {
            Entity::Info(info) => match facet {
                facets::PROJECT_TITLE => Some(Value::from(info.title.as_str())),
                facets::PROJECT_AUTHOR => Some(Value::from(info.author.as_str())),
                facets::PROJECT_LICENSE => Some(Value::from(info.license.as_str())),
                facets::PROJECT_DESCRIPTION => Some(Value::from(info.description.as_str())),
                _ => None,
            },
            Entity::Timeline(timeline) => match facet {
                facets::ANNOTATIONS => serde_json::to_value(&timeline.annotations).ok(),
                facets::KEY_SIGNATURES => serde_json::to_value(&timeline.key_signatures).ok(),
                facets::TIME_SIGNATURES => serde_json::to_value(&timeline.time_signatures).ok(),
                _ => None,
            },
            Entity::Track(track) => match facet {
                facets::TRACK_PATH => Some(Value::from(track.path.as_str())),
                facets::TRACK_MUTE => Some(Value::from(track.mute)),
                facets::TRACK_COLOUR => Some(Value::from(track.colour.as_str())),
                facets::TRACK_INSTRUMENT => Some(Value::from(track.instrument.as_str())),
                facets::TRACK_CONTROLLER => Some(track.controller.map_or(Value::Null, Value::from)),
                facets::EVENTS => serde_json::to_value(&track.events).ok(),
                _ => None,
            },
        }
    }

    /// Rebuild an entity from reconstructed state. Missing facets take
    /// their default value.
    pub fn from_state(type_tag: &str, id: Uuid, state: &EntityState) -> Result<Self, ProjectError> {
        let reader = FacetReader { type_tag, state };
        let entity = match type_tag {
            type_tags::PROJECT_INFO => Entity::Info(ProjectInfo {
                id,
                title: reader.read(facets::PROJECT_TITLE)?,
                author: reader.read(facets::PROJECT_AUTHOR)?,
                license: reader.read(facets::PROJECT_LICENSE)?,
                description: reader.read(facets::PROJECT_DESCRIPTION)?,
            }),
            type_tags::PROJECT_TIMELINE => Entity::Timeline(ProjectTimeline {
                id,
                annotations: reader.read_events(facets::ANNOTATIONS)?,
                key_signatures: reader.read_events(facets::KEY_SIGNATURES)?,
                time_signatures: reader.read_events(facets::TIME_SIGNATURES)?,
            }),
            type_tags::PIANO_TRACK | type_tags::AUTOMATION_TRACK => Entity::Track(Track {
                id,
                kind: if type_tag == type_tags::PIANO_TRACK {
                    TrackKind::Piano
                } else {
                    TrackKind::Automation
                },
                path: reader.read(facets::TRACK_PATH)?,
                mute: reader.read(facets::TRACK_MUTE)?,
                colour: reader.read(facets::TRACK_COLOUR)?,
                instrument: reader.read(facets::TRACK_INSTRUMENT)?,
                controller: reader.read(facets::TRACK_CONTROLLER)?,
                events: reader.read_events(facets::EVENTS)?,
            }),
            other => return Err(ProjectError::UnknownType(other.to_string())),
        };
        Ok(entity)
    }
}

struct FacetReader<'a> {
    type_tag: &'a str,
    state: &'a EntityState,
}

impl FacetReader<'_> {
    fn read<T: DeserializeOwned + Default>(&self, facet: &str) -> Result<T, ProjectError> {
        match self.state.get(facet) {
            None => Ok(T::default()),
            Some(payload) if payload.is_null() => Ok(T::default()),
            Some(payload) => serde_json::from_value(payload.value().clone()).map_err(|e| {
                ProjectError::InvalidFacet {
                    type_tag: self.type_tag.to_string(),
                    facet: facet.to_string(),
                    reason: e.to_string(),
                }
            }),
        }
    }

    fn read_events(&self, facet: &str) -> Result<Vec<Event>, ProjectError> {
        let mut events: Vec<Event> = self.read(facet)?;
        sort_events(&mut events);
        Ok(events)
    }
}

impl TrackedItem for Entity {
    fn vcs_id(&self) -> Uuid {
        self.id()
    }

    fn vcs_name(&self) -> String {
        self.name()
    }

    fn type_tag(&self) -> &str {
        Entity::type_tag(self)
    }

    fn num_deltas(&self) -> usize {
        self.facet_names().len()
    }

    fn delta(&self, index: usize) -> Option<Delta> {
        self.facet_names().get(index).map(|facet| Delta::new(*facet))
    }

    fn serialize_delta_data(&self, index: usize) -> Option<Payload> {
        let facet = self.facet_names().get(index)?;
        self.facet_value(facet).map(Payload::new)
    }
}
