//! On-disk record formats.
//!
//! ```text
//! PackRecord (bincode)
//! ┌───────────┬──────────┬───────────────┬──────────┬─────────────────────┐
//! │ entity_id │ delta_id │ original_size │ checksum │ LZ4(payload bytes)  │
//! └───────────┴──────────┴───────────────┴──────────┴─────────────────────┘
//! ```
//!
//! The checksum is FNV-1a over both ids and the uncompressed payload, so a
//! record copied under the wrong key is rejected as well as a corrupted one.

use serde::{Deserialize, Serialize};
use stave_vcs::SerializedNode;
use uuid::Uuid;

use crate::error::StoreError;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// FNV-1a over the given byte slices.
pub fn checksum(parts: &[&[u8]]) -> u32 {
    let mut hash = FNV_OFFSET;
    for part in parts {
        for byte in *part {
            hash ^= *byte as u32;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

/// One stored delta payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackRecord {
    pub entity_id: Uuid,
    pub delta_id: Uuid,
    /// Uncompressed payload size in bytes
    pub original_size: u32,
    pub checksum: u32,
    /// LZ4-compressed payload, size prepended
    pub compressed: Vec<u8>,
}

impl PackRecord {
    /// Compress and checksum raw payload bytes.
    pub fn seal(entity_id: Uuid, delta_id: Uuid, payload: &[u8]) -> Self {
        Self {
            entity_id,
            delta_id,
            original_size: payload.len() as u32,
            checksum: checksum(&[&entity_id.as_bytes()[..], &delta_id.as_bytes()[..], payload]),
            compressed: lz4_flex::compress_prepend_size(payload),
        }
    }

    /// Decompress and verify. Returns the raw payload bytes.
    pub fn open(&self) -> Result<Vec<u8>, StoreError> {
        let payload = lz4_flex::decompress_size_prepended(&self.compressed)
            .map_err(|e| StoreError::Compression(e.to_string()))?;
        let expected = checksum(&[
            &self.entity_id.as_bytes()[..],
            &self.delta_id.as_bytes()[..],
            payload.as_slice(),
        ]);
        if payload.len() != self.original_size as usize || expected != self.checksum {
            return Err(StoreError::Checksum {
                entity_id: self.entity_id,
                delta_id: self.delta_id,
            });
        }
        Ok(payload)
    }

    pub fn compressed_size(&self) -> usize {
        self.compressed.len()
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(record)
    }
}

/// Serialized revision graph as stored in the history column family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub saved_at: u64,
    pub checksum: u32,
    /// LZ4(bincode(SerializedNode))
    pub compressed: Vec<u8>,
}

impl HistoryRecord {
    pub fn seal(node: &SerializedNode, saved_at: u64) -> Result<Self, StoreError> {
        let raw = bincode::serde::encode_to_vec(node, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Self {
            saved_at,
            checksum: checksum(&[raw.as_slice()]),
            compressed: lz4_flex::compress_prepend_size(&raw),
        })
    }

    pub fn open(&self) -> Result<SerializedNode, StoreError> {
        let raw = lz4_flex::decompress_size_prepended(&self.compressed)
            .map_err(|e| StoreError::Compression(e.to_string()))?;
        if checksum(&[raw.as_slice()]) != self.checksum {
            return Err(StoreError::CorruptHistory);
        }
        let (node, _) = bincode::serde::decode_from_slice(&raw, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(node)
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(record)
    }
}
