//! Generic structured tree used for revision metadata.
//!
//! Every persisted engine object (deltas, revision items, revisions, the
//! whole history) serializes into a [`SerializedNode`]: a tag, string-valued
//! attributes and ordered children. Delta payloads never live in this tree;
//! they travel separately and are reattached by delta id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::VcsError;

/// Node tags and attribute names.
pub mod keys {
    pub const DELTA: &str = "delta";
    pub const REVISION_ITEM: &str = "revisionItem";
    pub const REVISION: &str = "revision";
    pub const HISTORY: &str = "history";
    pub const VERSION_CONTROL: &str = "versionControl";

    pub const ID: &str = "id";
    pub const KIND: &str = "kind";
    pub const ITEM_TYPE: &str = "type";
    pub const NAME: &str = "name";
    pub const DIFF_LOGIC: &str = "diffLogic";
    pub const PARENT: &str = "parent";
    pub const SEQUENCE: &str = "sequence";
    pub const MESSAGE: &str = "message";
    pub const CREATED_AT: &str = "createdAt";
    pub const HEAD: &str = "head";
    pub const ROOT: &str = "root";
}

/// A tagged node with string attributes and ordered children.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SerializedNode {
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<SerializedNode>,
}

impl SerializedNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, name: &str, value: impl ToString) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn set_attribute(&mut self, name: &str, value: impl ToString) {
        self.attributes.insert(name.to_string(), value.to_string());
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn push_child(&mut self, child: SerializedNode) {
        self.children.push(child);
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tag == tag
    }

    /// First direct child carrying `tag`.
    pub fn child_with_tag(&self, tag: &str) -> Option<&SerializedNode> {
        self.children.iter().find(|c| c.tag == tag)
    }

    /// This node if it has `tag`, otherwise its first child with `tag`.
    pub fn find(&self, tag: &str) -> Result<&SerializedNode, VcsError> {
        if self.has_tag(tag) {
            return Ok(self);
        }
        self.child_with_tag(tag).ok_or_else(|| {
            VcsError::SchemaViolation(format!("expected <{tag}> node, found <{}>", self.tag))
        })
    }

    /// Attribute that must be present and non-empty.
    pub fn require_attribute(&self, name: &str) -> Result<&str, VcsError> {
        match self.attribute(name) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(VcsError::SchemaViolation(format!(
                "<{}> is missing required attribute '{name}'",
                self.tag
            ))),
        }
    }

    pub fn require_uuid(&self, name: &str) -> Result<Uuid, VcsError> {
        let raw = self.require_attribute(name)?;
        Uuid::parse_str(raw).map_err(|e| {
            VcsError::SchemaViolation(format!("<{}> has invalid uuid '{name}': {e}", self.tag))
        })
    }

    pub fn optional_uuid(&self, name: &str) -> Result<Option<Uuid>, VcsError> {
        match self.attribute(name) {
            None | Some("") => Ok(None),
            Some(_) => self.require_uuid(name).map(Some),
        }
    }

    /// Integer attribute, `default` when absent.
    pub fn integer_or(&self, name: &str, default: i64) -> Result<i64, VcsError> {
        match self.attribute(name) {
            None | Some("") => Ok(default),
            Some(raw) => raw.parse().map_err(|_| {
                VcsError::SchemaViolation(format!(
                    "<{}> has non-integer attribute '{name}': {raw}",
                    self.tag
                ))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_self_or_child() {
        let mut root = SerializedNode::new("wrapper");
        root.push_child(SerializedNode::new(keys::DELTA).with_attribute(keys::KIND, "path"));

        let found = root.find(keys::DELTA).unwrap();
        assert_eq!(found.attribute(keys::KIND), Some("path"));
        assert!(found.find(keys::DELTA).is_ok());
        assert!(root.find(keys::REVISION).is_err());
    }

    #[test]
    fn test_require_attribute_rejects_empty() {
        let node = SerializedNode::new(keys::REVISION_ITEM).with_attribute(keys::DIFF_LOGIC, "");
        let err = node.require_attribute(keys::DIFF_LOGIC).unwrap_err();
        assert!(matches!(err, VcsError::SchemaViolation(_)));
    }

    #[test]
    fn test_uuid_attributes() {
        let id = Uuid::new_v4();
        let node = SerializedNode::new(keys::REVISION)
            .with_attribute(keys::ID, id)
            .with_attribute(keys::PARENT, "not-a-uuid");

        assert_eq!(node.require_uuid(keys::ID).unwrap(), id);
        assert!(node.optional_uuid(keys::PARENT).is_err());
        assert_eq!(node.optional_uuid(keys::HEAD).unwrap(), None);
    }

    #[test]
    fn test_integer_or_default() {
        let node = SerializedNode::new(keys::REVISION).with_attribute(keys::SEQUENCE, 42);
        assert_eq!(node.integer_or(keys::SEQUENCE, 0).unwrap(), 42);
        assert_eq!(node.integer_or(keys::CREATED_AT, 7).unwrap(), 7);
    }
}
