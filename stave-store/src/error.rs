use stave_vcs::{PackError, VcsError};
use thiserror::Error;
use uuid::Uuid;

/// Storage errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Delta data not found: entity {entity_id}, delta {delta_id}")]
    NotFound { entity_id: Uuid, delta_id: Uuid },

    /// Write-once key rewritten with different content.
    #[error("Conflicting write: entity {entity_id}, delta {delta_id}")]
    Conflict { entity_id: Uuid, delta_id: Uuid },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Checksum mismatch: entity {entity_id}, delta {delta_id}")]
    Checksum { entity_id: Uuid, delta_id: Uuid },

    #[error("Stored history failed its checksum")]
    CorruptHistory,

    #[error(transparent)]
    Vcs(#[from] VcsError),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<StoreError> for PackError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity_id, delta_id } => {
                PackError::NotFound { entity_id, delta_id }
            }
            StoreError::Conflict { entity_id, delta_id } => {
                PackError::Conflict { entity_id, delta_id }
            }
            StoreError::Database(msg) => PackError::Backend(msg),
            other => PackError::Codec(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_pack_not_found() {
        let (entity_id, delta_id) = (Uuid::new_v4(), Uuid::new_v4());
        let pack: PackError = StoreError::NotFound { entity_id, delta_id }.into();
        assert_eq!(pack, PackError::NotFound { entity_id, delta_id });

        let vcs: VcsError = pack.into();
        assert!(vcs.is_recoverable());
    }

    #[test]
    fn test_checksum_maps_to_codec() {
        let pack: PackError = StoreError::Checksum {
            entity_id: Uuid::new_v4(),
            delta_id: Uuid::new_v4(),
        }
        .into();
        assert!(matches!(pack, PackError::Codec(_)));
        assert!(matches!(
            PackError::from(StoreError::Database("io".into())),
            PackError::Backend(_)
        ));
    }
}
