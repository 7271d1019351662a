//! Event-level diff strategy for entities holding event sequences.
//!
//! Scalar facets behave like [`FacetDiffLogic`](stave_vcs::FacetDiffLogic):
//! a changed value is stored whole. Sequence facets are JSON arrays of
//! events identified by their `id` field, and changes between two arrays
//! are stored per event:
//!
//! ```text
//!   events           whole array (first capture, or a non-array value)
//!   events.removed   [ "<id>", ... ]
//!   events.changed   [ {event}, ... ]   replaces events with the same id
//!   events.added     [ {event}, ... ]
//! ```
//!
//! After applying, every touched sequence is re-sorted by (beat, id).

use std::cmp::Ordering;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use stave_vcs::{Delta, DeltaWithData, DiffLogic, EntityState, Payload, VcsError};

pub const ADDED: &str = "added";
pub const REMOVED: &str = "removed";
pub const CHANGED: &str = "changed";

/// What a delta kind addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target<'a> {
    Whole(&'a str),
    Added(&'a str),
    Removed(&'a str),
    Changed(&'a str),
}

fn split_kind(kind: &str) -> Target<'_> {
    match kind.rsplit_once('.') {
        Some((facet, ADDED)) => Target::Added(facet),
        Some((facet, REMOVED)) => Target::Removed(facet),
        Some((facet, CHANGED)) => Target::Changed(facet),
        _ => Target::Whole(kind),
    }
}

fn event_id(event: &Value) -> Option<&str> {
    event.get("id")?.as_str()
}

fn event_order(a: &Value, b: &Value) -> Ordering {
    let beat = |v: &Value| v.get("beat").and_then(Value::as_f64).unwrap_or(0.0);
    beat(a)
        .total_cmp(&beat(b))
        .then_with(|| event_id(a).cmp(&event_id(b)))
}

#[derive(Debug, Clone)]
pub struct SequenceDiffLogic {
    type_tag: String,
    scalars: Vec<String>,
    sequences: Vec<String>,
}

impl SequenceDiffLogic {
    pub fn new(type_tag: impl Into<String>, scalars: &[&str], sequences: &[&str]) -> Self {
        Self {
            type_tag: type_tag.into(),
            scalars: scalars.iter().map(|s| s.to_string()).collect(),
            sequences: sequences.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn is_sequence(&self, facet: &str) -> bool {
        self.sequences.iter().any(|s| s == facet)
    }

    fn violation(&self, detail: impl std::fmt::Display) -> VcsError {
        VcsError::SchemaViolation(format!("{}: {detail}", self.type_tag))
    }

    fn target<'a>(&self, kind: &'a str) -> Result<Target<'a>, VcsError> {
        let target = split_kind(kind);
        match target {
            Target::Whole(facet) => {
                if facet.is_empty() {
                    return Err(self.violation("delta without a facet kind"));
                }
                if !self.is_sequence(facet) && !self.scalars.iter().any(|s| s == facet) {
                    return Err(self.violation(format_args!("unknown facet '{facet}'")));
                }
            }
            Target::Added(facet) | Target::Removed(facet) | Target::Changed(facet) => {
                if !self.is_sequence(facet) {
                    return Err(self.violation(format_args!("'{facet}' is not a sequence")));
                }
            }
        }
        Ok(target)
    }

    fn events_of(&self, state: &EntityState, facet: &str) -> Result<Vec<Value>, VcsError> {
        match state.get(facet).map(Payload::value) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(events)) => Ok(events.clone()),
            Some(_) => Err(self.violation(format_args!("'{facet}' is not an array"))),
        }
    }

    fn array<'p>(&self, kind: &str, payload: &'p Payload) -> Result<&'p [Value], VcsError> {
        payload
            .value()
            .as_array()
            .map(Vec::as_slice)
            .ok_or_else(|| self.violation(format_args!("'{kind}' payload is not an array")))
    }

    fn identified<'v>(&self, facet: &str, event: &'v Value) -> Result<&'v str, VcsError> {
        event_id(event).ok_or_else(|| self.violation(format_args!("event in '{facet}' has no id")))
    }

    fn diff_sequence(
        &self,
        facet: &str,
        old: &[Value],
        new: &[Value],
        out: &mut Vec<DeltaWithData>,
    ) -> Result<(), VcsError> {
        let mut old_by_id: FxHashMap<&str, &Value> = FxHashMap::default();
        for event in old {
            old_by_id.insert(self.identified(facet, event)?, event);
        }

        let mut seen = FxHashSet::default();
        let mut added = Vec::new();
        let mut changed = Vec::new();
        for event in new {
            let id = self.identified(facet, event)?;
            seen.insert(id);
            match old_by_id.get(id) {
                None => added.push(event.clone()),
                Some(before) if *before != event => changed.push(event.clone()),
                Some(_) => {}
            }
        }
        let removed: Vec<Value> = old
            .iter()
            .filter_map(event_id)
            .filter(|id| !seen.contains(id))
            .map(|id| Value::String(id.to_string()))
            .collect();

        for (suffix, events) in [(REMOVED, removed), (CHANGED, changed), (ADDED, added)] {
            if !events.is_empty() {
                out.push((
                    Delta::new(format!("{facet}.{suffix}")),
                    Payload::new(Value::Array(events)),
                ));
            }
        }
        Ok(())
    }
}

impl DiffLogic for SequenceDiffLogic {
    fn type_tag(&self) -> &str {
        &self.type_tag
    }

    fn diff(&self, old: &EntityState, new: &EntityState) -> Result<Vec<DeltaWithData>, VcsError> {
        let mut changes = Vec::new();
        for (kind, payload) in new.iter() {
            self.target(kind)?;
            let before = old.get(kind);
            if before == Some(payload) {
                continue;
            }
            match (before.map(Payload::value), payload.value()) {
                (Some(Value::Array(a)), Value::Array(b)) if self.is_sequence(kind) => {
                    self.diff_sequence(kind, a, b, &mut changes)?;
                }
                _ => changes.push((Delta::new(kind), payload.clone())),
            }
        }
        Ok(changes)
    }

    fn apply(&self, base: &EntityState, deltas: &[DeltaWithData]) -> Result<EntityState, VcsError> {
        let mut state = base.clone();
        let mut touched: Vec<&str> = Vec::new();

        for (delta, payload) in deltas {
            let facet = match self.target(delta.kind())? {
                Target::Whole(facet) => {
                    state.set(facet, payload.clone());
                    continue;
                }
                Target::Added(facet) => {
                    let mut events = self.events_of(&state, facet)?;
                    for event in self.array(delta.kind(), payload)? {
                        let id = self.identified(facet, event)?;
                        if events.iter().any(|e| event_id(e) == Some(id)) {
                            return Err(VcsError::BrokenHistory(format!(
                                "{}: event {id} added twice to '{facet}'",
                                self.type_tag
                            )));
                        }
                        events.push(event.clone());
                    }
                    state.set(facet, Value::Array(events));
                    facet
                }
                Target::Changed(facet) => {
                    let mut events = self.events_of(&state, facet)?;
                    for event in self.array(delta.kind(), payload)? {
                        let id = self.identified(facet, event)?;
                        let slot = events
                            .iter_mut()
                            .find(|e| event_id(e) == Some(id))
                            .ok_or_else(|| {
                                VcsError::BrokenHistory(format!(
                                    "{}: changed event {id} missing from '{facet}'",
                                    self.type_tag
                                ))
                            })?;
                        *slot = event.clone();
                    }
                    state.set(facet, Value::Array(events));
                    facet
                }
                Target::Removed(facet) => {
                    let mut events = self.events_of(&state, facet)?;
                    for id in self.array(delta.kind(), payload)? {
                        let id = id.as_str().ok_or_else(|| {
                            self.violation(format_args!("'{}' holds a non-string id", delta.kind()))
                        })?;
                        let before = events.len();
                        events.retain(|e| event_id(e) != Some(id));
                        if events.len() == before {
                            log::warn!("{}: removed event {id} not in '{facet}'", self.type_tag);
                        }
                    }
                    state.set(facet, Value::Array(events));
                    facet
                }
            };
            if !touched.contains(&facet) {
                touched.push(facet);
            }
        }

        for facet in touched {
            let mut events = self.events_of(&state, facet)?;
            events.sort_by(event_order);
            state.set(facet, Value::Array(events));
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn logic() -> SequenceDiffLogic {
        SequenceDiffLogic::new("pianoTrack", &["trackPath", "trackMute"], &["events"])
    }

    fn note(id: &str, beat: f64, key: i64) -> Value {
        json!({"id": id, "beat": beat, "type": "note", "key": key, "length": 1.0, "velocity": 1.0})
    }

    fn kinds(deltas: &[DeltaWithData]) -> Vec<&str> {
        deltas.iter().map(|(d, _)| d.kind()).collect()
    }

    #[test]
    fn test_first_capture_is_whole_facet() {
        let new = EntityState::new()
            .with_facet("trackPath", json!("/Piano"))
            .with_facet("events", json!([note("a", 0.0, 60)]));

        let deltas = logic().diff(&EntityState::new(), &new).unwrap();
        assert_eq!(kinds(&deltas), vec!["trackPath", "events"]);
        assert_eq!(logic().apply(&EntityState::new(), &deltas).unwrap(), new);
    }

    #[test]
    fn test_event_level_diff() {
        let old = EntityState::new()
            .with_facet("events", json!([note("a", 0.0, 60), note("b", 1.0, 62), note("c", 2.0, 64)]));
        let new = EntityState::new()
            .with_facet("events", json!([note("a", 0.0, 60), note("c", 2.0, 65), note("d", 3.0, 67)]));

        let deltas = logic().diff(&old, &new).unwrap();
        assert_eq!(kinds(&deltas), vec!["events.removed", "events.changed", "events.added"]);
        assert_eq!(deltas[0].1.value(), &json!(["b"]));
        assert_eq!(deltas[1].1.value(), &json!([note("c", 2.0, 65)]));
        assert_eq!(deltas[2].1.value(), &json!([note("d", 3.0, 67)]));

        assert_eq!(logic().apply(&old, &deltas).unwrap(), new);
    }

    #[test]
    fn test_apply_keeps_beat_order() {
        let base = EntityState::new().with_facet("events", json!([note("m", 4.0, 60)]));
        let deltas = vec![(
            Delta::new("events.added"),
            Payload::new(json!([note("z", 0.0, 48), note("b", 4.0, 50)])),
        )];

        let state = logic().apply(&base, &deltas).unwrap();
        let ids: Vec<&str> = state.get("events").unwrap().value().as_array().unwrap()
            .iter()
            .filter_map(event_id)
            .collect();
        assert_eq!(ids, vec!["z", "b", "m"]);
    }

    #[test]
    fn test_unchanged_sequence_produces_nothing() {
        let state = EntityState::new()
            .with_facet("trackMute", json!(false))
            .with_facet("events", json!([note("a", 0.0, 60)]));
        assert!(logic().diff(&state, &state.clone()).unwrap().is_empty());
    }

    #[test]
    fn test_change_to_missing_event_is_broken_history() {
        let deltas = vec![(Delta::new("events.changed"), Payload::new(json!([note("x", 0.0, 60)])))];
        assert!(matches!(
            logic().apply(&EntityState::new(), &deltas),
            Err(VcsError::BrokenHistory(_))
        ));
    }

    #[test]
    fn test_removing_unknown_event_is_tolerated() {
        let base = EntityState::new().with_facet("events", json!([note("a", 0.0, 60)]));
        let deltas = vec![(Delta::new("events.removed"), Payload::new(json!(["ghost"])))];
        assert_eq!(logic().apply(&base, &deltas).unwrap(), base);
    }

    #[test]
    fn test_schema_checks() {
        let scalar_split = vec![(Delta::new("trackMute.added"), Payload::new(json!([])))];
        assert!(matches!(
            logic().apply(&EntityState::new(), &scalar_split),
            Err(VcsError::SchemaViolation(_))
        ));

        let unknown = EntityState::new().with_facet("tempo", json!(120));
        assert!(matches!(
            logic().diff(&EntityState::new(), &unknown),
            Err(VcsError::SchemaViolation(_))
        ));

        let anonymous = EntityState::new().with_facet("events", json!([{"beat": 0.0}]));
        let old = EntityState::new().with_facet("events", json!([]));
        assert!(logic().diff(&old, &anonymous).is_err());
    }
}
