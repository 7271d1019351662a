use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::VcsError;
use crate::tree::{keys, SerializedNode};

/// A named change-facet slot. Never carries its payload.
///
/// Two deltas with the same id in different revision items denote the same
/// facet of the same entity; a facet's value at a later revision always gets
/// a fresh id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Delta {
    id: Uuid,
    kind: String,
}

impl Delta {
    /// New delta with a freshly minted id.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
        }
    }

    pub fn with_id(id: Uuid, kind: impl Into<String>) -> Self {
        Self {
            id,
            kind: kind.into(),
        }
    }

    /// Slot for data that arrived before its descriptor.
    pub fn placeholder(id: Uuid) -> Self {
        Self {
            id,
            kind: String::new(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.kind.is_empty()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn serialize(&self) -> SerializedNode {
        SerializedNode::new(keys::DELTA)
            .with_attribute(keys::ID, self.id)
            .with_attribute(keys::KIND, &self.kind)
    }

    pub fn deserialize(node: &SerializedNode) -> Result<Self, VcsError> {
        if !node.has_tag(keys::DELTA) {
            return Err(VcsError::SchemaViolation(format!(
                "expected <{}> node, found <{}>",
                keys::DELTA,
                node.tag
            )));
        }
        let id = node.require_uuid(keys::ID)?;
        let kind = node.attribute(keys::KIND).unwrap_or_default();
        Ok(Self::with_id(id, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_deltas_get_distinct_ids() {
        let a = Delta::new("path");
        let b = Delta::new("path");
        assert_eq!(a.kind(), b.kind());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_serialize_keeps_id_and_kind() {
        let delta = Delta::new("mute");
        let node = delta.serialize();
        assert_eq!(node.tag, keys::DELTA);
        assert_eq!(Delta::deserialize(&node).unwrap(), delta);
    }

    #[test]
    fn test_deserialize_requires_id() {
        let node = SerializedNode::new(keys::DELTA).with_attribute(keys::KIND, "events");
        assert!(matches!(
            Delta::deserialize(&node),
            Err(VcsError::SchemaViolation(_))
        ));
    }

    #[test]
    fn test_placeholder() {
        let id = Uuid::new_v4();
        let delta = Delta::placeholder(id);
        assert!(delta.is_placeholder());
        assert_eq!(delta.id(), id);
        assert!(!Delta::new("x").is_placeholder());
    }
}
