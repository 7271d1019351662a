//! Per-entity-type diff strategies.
//!
//! A closed table maps each entity type tag to a [`DiffLogic`] strategy.
//! The table is filled once when the host builds its
//! [`DiffLogicRegistry`]; every later lookup of an unregistered tag is a
//! schema violation, since it means either a corrupted history or a host
//! that does not match the stored data.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::delta::Delta;
use crate::error::VcsError;
use crate::payload::{EntityState, Payload};
use crate::tracked::TrackedItem;

/// One facet update: its descriptor and payload.
pub type DeltaWithData = (Delta, Payload);

/// Computes and applies facet deltas for one entity kind.
pub trait DiffLogic: Send + Sync {
    fn type_tag(&self) -> &str;

    /// Deltas turning `old` into `new`. Unchanged facets produce nothing;
    /// every produced delta gets a fresh id. Output order depends only on
    /// the inputs.
    fn diff(&self, old: &EntityState, new: &EntityState) -> Result<Vec<DeltaWithData>, VcsError>;

    /// Apply the deltas of one revision, in order, on top of `base`.
    /// A later delta of the same kind overrides an earlier one.
    fn apply(&self, base: &EntityState, deltas: &[DeltaWithData]) -> Result<EntityState, VcsError>;
}

/// Whole-facet strategy: a changed facet is stored in full.
#[derive(Debug, Clone)]
pub struct FacetDiffLogic {
    type_tag: String,
    schema: Option<Vec<String>>,
}

impl FacetDiffLogic {
    /// Strategy accepting any facet kind.
    pub fn new(type_tag: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            schema: None,
        }
    }

    /// Strategy restricted to the listed facet kinds.
    pub fn with_schema(type_tag: impl Into<String>, kinds: &[&str]) -> Self {
        Self {
            type_tag: type_tag.into(),
            schema: Some(kinds.iter().map(|k| k.to_string()).collect()),
        }
    }

    pub fn schema(&self) -> Option<&[String]> {
        self.schema.as_deref()
    }

    fn check_kind(&self, kind: &str) -> Result<(), VcsError> {
        if kind.is_empty() {
            return Err(VcsError::SchemaViolation(format!(
                "{}: delta without a facet kind",
                self.type_tag
            )));
        }
        match &self.schema {
            Some(kinds) if !kinds.iter().any(|k| k == kind) => Err(VcsError::SchemaViolation(
                format!("{}: unknown facet '{kind}'", self.type_tag),
            )),
            _ => Ok(()),
        }
    }
}

impl DiffLogic for FacetDiffLogic {
    fn type_tag(&self) -> &str {
        &self.type_tag
    }

    fn diff(&self, old: &EntityState, new: &EntityState) -> Result<Vec<DeltaWithData>, VcsError> {
        let mut changes = Vec::new();
        for (kind, payload) in new.iter() {
            self.check_kind(kind)?;
            if old.get(kind) != Some(payload) {
                changes.push((Delta::new(kind), payload.clone()));
            }
        }
        Ok(changes)
    }

    fn apply(&self, base: &EntityState, deltas: &[DeltaWithData]) -> Result<EntityState, VcsError> {
        let mut state = base.clone();
        for (delta, payload) in deltas {
            self.check_kind(delta.kind())?;
            state.set(delta.kind(), payload.clone());
        }
        Ok(state)
    }
}

/// Type tag → strategy table.
#[derive(Clone, Default)]
pub struct DiffLogicRegistry {
    strategies: FxHashMap<String, Arc<dyn DiffLogic>>,
}

impl DiffLogicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, logic: impl DiffLogic + 'static) -> Self {
        self.register(logic);
        self
    }

    pub fn register(&mut self, logic: impl DiffLogic + 'static) -> &mut Self {
        self.register_shared(Arc::new(logic))
    }

    pub fn register_shared(&mut self, logic: Arc<dyn DiffLogic>) -> &mut Self {
        let tag = logic.type_tag().to_string();
        if self.strategies.insert(tag.clone(), logic).is_some() {
            log::warn!("Diff logic for '{tag}' registered twice, keeping the latest");
        }
        self
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.strategies.contains_key(type_tag)
    }

    /// Registered tags, sorted.
    pub fn type_tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Strategy for a stored type tag.
    pub fn create_logic_for(&self, type_tag: &str) -> Result<Arc<dyn DiffLogic>, VcsError> {
        if type_tag.is_empty() {
            return Err(VcsError::SchemaViolation("empty diff logic type tag".into()));
        }
        self.strategies.get(type_tag).cloned().ok_or_else(|| {
            VcsError::SchemaViolation(format!("no diff logic registered for '{type_tag}'"))
        })
    }

    /// Strategy for a revision item being built as a copy of `source`.
    pub fn create_logic_copy(
        &self,
        source: &dyn TrackedItem,
    ) -> Result<Arc<dyn DiffLogic>, VcsError> {
        self.create_logic_for(source.type_tag())
    }
}

impl std::fmt::Debug for DiffLogicRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffLogicRegistry")
            .field("type_tags", &self.type_tags())
            .finish()
    }
}
