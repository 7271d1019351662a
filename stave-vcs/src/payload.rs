//! Delta payloads and reconstructed entity state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PackError;

/// Opaque value of one facet at one revision.
///
/// Backed by a JSON value tree; the engine only compares, copies and
/// encodes it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Value);

impl Payload {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn null() -> Self {
        Self(Value::Null)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Encode to bytes for pack storage.
    pub fn encode(&self) -> Result<Vec<u8>, PackError> {
        serde_json::to_vec(&self.0).map_err(|e| PackError::Codec(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PackError> {
        serde_json::from_slice(bytes)
            .map(Self)
            .map_err(|e| PackError::Codec(e.to_string()))
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Full state of one entity: facet kind → payload, in facet order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityState {
    facets: Vec<(String, Payload)>,
}

impl EntityState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`set`](Self::set).
    pub fn with_facet(mut self, kind: impl Into<String>, payload: impl Into<Payload>) -> Self {
        self.set(kind, payload);
        self
    }

    pub fn get(&self, kind: &str) -> Option<&Payload> {
        self.facets.iter().find(|(k, _)| k == kind).map(|(_, p)| p)
    }

    /// Replace the facet in place, or append it if absent.
    pub fn set(&mut self, kind: impl Into<String>, payload: impl Into<Payload>) {
        let kind = kind.into();
        let payload = payload.into();
        match self.facets.iter_mut().find(|(k, _)| *k == kind) {
            Some(slot) => slot.1 = payload,
            None => self.facets.push((kind, payload)),
        }
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.facets.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Payload)> {
        self.facets.iter().map(|(k, p)| (k.as_str(), p))
    }

    pub fn len(&self) -> usize {
        self.facets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facets.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Payload)> for EntityState {
    fn from_iter<I: IntoIterator<Item = (K, Payload)>>(iter: I) -> Self {
        let mut state = EntityState::new();
        for (kind, payload) in iter {
            state.set(kind, payload);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_encode_decode() {
        let payload = Payload::new(json!({"key": 60, "beat": 4.5, "tags": ["a", "b"]}));
        let bytes = payload.encode().unwrap();
        assert_eq!(Payload::decode(&bytes).unwrap(), payload);
    }

    #[test]
    fn test_payload_decode_garbage() {
        let err = Payload::decode(b"\xff\x00not json").unwrap_err();
        assert!(matches!(err, PackError::Codec(_)));
    }

    #[test]
    fn test_state_set_replaces_in_place() {
        let mut state = EntityState::new()
            .with_facet("path", json!("/Piano"))
            .with_facet("mute", json!(false));
        state.set("path", json!("/Strings"));

        assert_eq!(state.len(), 2);
        assert_eq!(state.kinds().collect::<Vec<_>>(), vec!["path", "mute"]);
        assert_eq!(state.get("path").unwrap().value(), &json!("/Strings"));
    }

    #[test]
    fn test_state_from_iter() {
        let state: EntityState = vec![
            ("a", Payload::new(json!(1))),
            ("b", Payload::new(json!(2))),
            ("a", Payload::new(json!(3))),
        ]
        .into_iter()
        .collect();

        assert_eq!(state.len(), 2);
        assert_eq!(state.get("a").unwrap().value(), &json!(3));
    }
}
