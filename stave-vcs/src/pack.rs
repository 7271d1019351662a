//! Delta payload store.
//!
//! ```text
//! ┌──────────────────┐  flush_data   ┌──────────────────────────────┐
//! │  RevisionItem    │ ────────────► │ Pack                          │
//! │  in-memory slots │               │ (entity id, delta id) → bytes │
//! └────────┬─────────┘               └──────────────┬───────────────┘
//!          │ payload_for: slot first, pack second    │
//!          └─────────────────────────────────────────┘
//! ```
//!
//! Keys are write-once: rewriting a key with identical bytes is a no-op,
//! rewriting it with different bytes is a [`PackError::Conflict`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::error::PackError;
use crate::payload::Payload;

/// Durable mapping from (entity id, delta id) to payload.
pub trait Pack: Send + Sync {
    /// Write a payload under a new key.
    fn set_delta_data_for(
        &self,
        entity_id: Uuid,
        delta_id: Uuid,
        data: &Payload,
    ) -> Result<(), PackError>;

    /// Read a payload; [`PackError::NotFound`] when the key is absent.
    fn create_delta_data_for(&self, entity_id: Uuid, delta_id: Uuid) -> Result<Payload, PackError>;

    fn contains_delta_data(&self, entity_id: Uuid, delta_id: Uuid) -> Result<bool, PackError>;
}

/// Shared handle to a pack, held by every revision item.
pub type PackPtr = Arc<dyn Pack>;

/// Process-local pack. Used in tests and for documents that are never saved.
#[derive(Debug, Default)]
pub struct MemoryPack {
    entries: RwLock<FxHashMap<(Uuid, Uuid), Vec<u8>>>,
    writes: AtomicU64,
}

impl MemoryPack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor returning a shared handle.
    pub fn shared() -> PackPtr {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of writes that actually inserted a key.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Drop every payload of one entity (history pruning).
    pub fn remove_entity(&self, entity_id: Uuid) -> Result<usize, PackError> {
        let mut entries = self.entries.write().map_err(|_| PackError::Poisoned)?;
        let before = entries.len();
        entries.retain(|(entity, _), _| *entity != entity_id);
        Ok(before - entries.len())
    }
}

impl Pack for MemoryPack {
    fn set_delta_data_for(
        &self,
        entity_id: Uuid,
        delta_id: Uuid,
        data: &Payload,
    ) -> Result<(), PackError> {
        let bytes = data.encode()?;
        let mut entries = self.entries.write().map_err(|_| PackError::Poisoned)?;
        match entries.get(&(entity_id, delta_id)) {
            Some(existing) if *existing == bytes => Ok(()),
            Some(_) => Err(PackError::Conflict { entity_id, delta_id }),
            None => {
                entries.insert((entity_id, delta_id), bytes);
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    fn create_delta_data_for(&self, entity_id: Uuid, delta_id: Uuid) -> Result<Payload, PackError> {
        let entries = self.entries.read().map_err(|_| PackError::Poisoned)?;
        match entries.get(&(entity_id, delta_id)) {
            Some(bytes) => Payload::decode(bytes),
            None => Err(PackError::NotFound { entity_id, delta_id }),
        }
    }

    fn contains_delta_data(&self, entity_id: Uuid, delta_id: Uuid) -> Result<bool, PackError> {
        let entries = self.entries.read().map_err(|_| PackError::Poisoned)?;
        Ok(entries.contains_key(&(entity_id, delta_id)))
    }
}
