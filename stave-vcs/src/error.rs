use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a [`Pack`](crate::pack::Pack) backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PackError {
    #[error("Delta data not found: entity {entity_id}, delta {delta_id}")]
    NotFound { entity_id: Uuid, delta_id: Uuid },

    /// An immutable key was written twice with different content.
    #[error("Delta data already written with different content: entity {entity_id}, delta {delta_id}")]
    Conflict { entity_id: Uuid, delta_id: Uuid },

    #[error("Payload codec error: {0}")]
    Codec(String),

    #[error("Pack backend error: {0}")]
    Backend(String),

    #[error("Pack lock poisoned")]
    Poisoned,
}

/// Errors raised by the version-control engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VcsError {
    /// Unknown diff-logic tag, missing identity field, malformed node.
    /// Fatal: the engine never proceeds with partially-resolved state.
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    /// Payload absent from both the in-memory slot and the pack.
    #[error("Delta data not found: entity {entity_id}, delta {delta_id}")]
    NotFound { entity_id: Uuid, delta_id: Uuid },

    #[error("Unknown revision: {0}")]
    UnknownRevision(Uuid),

    /// The revision graph contradicts itself (dangling parent, change to an
    /// entity that does not exist at the parent, cycles).
    #[error("Broken history: {0}")]
    BrokenHistory(String),

    #[error("Pack error: {0}")]
    Pack(PackError),

    /// The host document refused or failed an operation.
    #[error("Host error: {0}")]
    Host(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Version control lock poisoned")]
    Poisoned,
}

impl VcsError {
    /// Whether the caller can reasonably continue (e.g. skip a pruned facet).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, VcsError::NotFound { .. })
    }
}

impl From<PackError> for VcsError {
    fn from(e: PackError) -> Self {
        match e {
            PackError::NotFound { entity_id, delta_id } => {
                VcsError::NotFound { entity_id, delta_id }
            }
            other => VcsError::Pack(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_not_found_maps_to_vcs_not_found() {
        let entity_id = Uuid::new_v4();
        let delta_id = Uuid::new_v4();
        let err: VcsError = PackError::NotFound { entity_id, delta_id }.into();
        assert_eq!(err, VcsError::NotFound { entity_id, delta_id });
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_other_pack_errors_are_wrapped() {
        let err: VcsError = PackError::Backend("disk full".into()).into();
        assert!(matches!(err, VcsError::Pack(PackError::Backend(_))));
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_schema_violation_is_fatal() {
        let err = VcsError::SchemaViolation("unknown diff logic 'foo'".into());
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("foo"));
    }
}
