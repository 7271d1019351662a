//! Timed events: notes, automation points and timeline markers.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind-specific fields of an [`Event`].
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventKind {
    Note {
        key: i32,
        length: f64,
        velocity: f64,
    },
    Automation {
        value: f64,
        curvature: f64,
    },
    Annotation {
        text: String,
        colour: String,
    },
    #[serde(rename_all = "camelCase")]
    KeySignature {
        root_key: i32,
        scale: String,
    },
    TimeSignature {
        numerator: u32,
        denominator: u32,
    },
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Event {
    pub id: Uuid,
    pub beat: f64,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(beat: f64, kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            beat,
            kind,
        }
    }

    pub fn note(beat: f64, key: i32, length: f64, velocity: f64) -> Self {
        Self::new(
            beat,
            EventKind::Note {
                key,
                length,
                velocity,
            },
        )
    }

    pub fn automation(beat: f64, value: f64, curvature: f64) -> Self {
        Self::new(beat, EventKind::Automation { value, curvature })
    }

    pub fn annotation(beat: f64, text: impl Into<String>, colour: impl Into<String>) -> Self {
        Self::new(
            beat,
            EventKind::Annotation {
                text: text.into(),
                colour: colour.into(),
            },
        )
    }

    pub fn key_signature(beat: f64, root_key: i32, scale: impl Into<String>) -> Self {
        Self::new(
            beat,
            EventKind::KeySignature {
                root_key,
                scale: scale.into(),
            },
        )
    }

    pub fn time_signature(beat: f64, numerator: u32, denominator: u32) -> Self {
        Self::new(
            beat,
            EventKind::TimeSignature {
                numerator,
                denominator,
            },
        )
    }

    /// Sequence order: by beat, then by id.
    pub fn order(&self, other: &Self) -> Ordering {
        self.beat
            .total_cmp(&other.beat)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Sort a sequence into playback order.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(Event::order);
}
