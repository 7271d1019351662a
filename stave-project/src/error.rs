use stave_vcs::VcsError;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while editing or restoring a project.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProjectError {
    #[error("Project lock poisoned")]
    Poisoned,

    #[error("Unknown entity: {0}")]
    UnknownEntity(Uuid),

    #[error("Project has no {0} entity")]
    Missing(&'static str),

    #[error("Unknown event {event_id} in entity {entity_id}")]
    UnknownEvent { entity_id: Uuid, event_id: Uuid },

    #[error("Unknown entity type '{0}'")]
    UnknownType(String),

    /// A facet payload does not decode into the entity's field.
    #[error("Invalid facet '{facet}' on {type_tag}: {reason}")]
    InvalidFacet {
        type_tag: String,
        facet: String,
        reason: String,
    },

    #[error(transparent)]
    Vcs(#[from] VcsError),
}

impl From<ProjectError> for VcsError {
    fn from(e: ProjectError) -> Self {
        match e {
            ProjectError::Poisoned => VcsError::Poisoned,
            ProjectError::Vcs(inner) => inner,
            ProjectError::UnknownType(tag) => {
                VcsError::SchemaViolation(format!("no entity type '{tag}' in project"))
            }
            other => VcsError::Host(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_errors_map_into_vcs() {
        assert_eq!(VcsError::from(ProjectError::Poisoned), VcsError::Poisoned);
        assert!(matches!(
            VcsError::from(ProjectError::UnknownType("sampler".into())),
            VcsError::SchemaViolation(_)
        ));
        assert!(matches!(
            VcsError::from(ProjectError::UnknownEntity(Uuid::new_v4())),
            VcsError::Host(_)
        ));
    }
}
