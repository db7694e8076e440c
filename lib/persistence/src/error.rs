//! Error types for the persistence layer.
//!
//! The variants map onto the recovery policies of the callers: `NotFound`
//! is non-fatal and left to the caller, `Transient` propagates so the bus
//! nacks and redelivers, `Corrupt` and `InvalidSortField` never retry.

use operion_core::{WorkflowGroupId, WorkflowId};
use std::fmt;

/// Violations of the workflow-group lifecycle invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowGroupError {
    /// The group has no published workflow to act on.
    NoPublishedWorkflow { group_id: WorkflowGroupId },
    /// The group has no draft workflow to act on.
    NoDraftWorkflow { group_id: WorkflowGroupId },
    /// The group contains no workflows at all.
    EmptyGroup { group_id: WorkflowGroupId },
}

impl fmt::Display for WorkflowGroupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPublishedWorkflow { group_id } => {
                write!(f, "workflow group {group_id} has no published workflow")
            }
            Self::NoDraftWorkflow { group_id } => {
                write!(f, "workflow group {group_id} has no draft workflow")
            }
            Self::EmptyGroup { group_id } => {
                write!(f, "workflow group {group_id} contains no workflows")
            }
        }
    }
}

impl std::error::Error for WorkflowGroupError {}

/// Errors from repository operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// A lookup that must succeed returned nothing.
    NotFound {
        entity: &'static str,
        id: String,
    },
    /// The underlying storage is unavailable; safe to retry.
    Transient { message: String },
    /// A stored document could not be decoded; retrying will not help.
    Corrupt { message: String },
    /// A sort field outside the allowlist was requested.
    InvalidSortField { field: String },
    /// A workflow-group lifecycle invariant was violated.
    Group(WorkflowGroupError),
}

impl RepositoryError {
    /// Creates a not-found error for a workflow.
    #[must_use]
    pub fn workflow_not_found(id: WorkflowId) -> Self {
        Self::NotFound {
            entity: "workflow",
            id: id.to_string(),
        }
    }

    /// Returns true if the lookup found nothing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if the operation is safe to retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns true if a disallowed sort field was requested.
    #[must_use]
    pub fn is_invalid_sort_field(&self) -> bool {
        matches!(self, Self::InvalidSortField { .. })
    }

    /// Returns true if a workflow-group invariant was violated.
    #[must_use]
    pub fn is_group_error(&self) -> bool {
        matches!(self, Self::Group(_))
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Transient { message } => write!(f, "storage unavailable: {message}"),
            Self::Corrupt { message } => write!(f, "stored document is corrupt: {message}"),
            Self::InvalidSortField { field } => {
                write!(
                    f,
                    "invalid sort field '{field}': expected one of name, created_at, updated_at"
                )
            }
            Self::Group(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RepositoryError {}

impl From<WorkflowGroupError> for RepositoryError {
    fn from(e: WorkflowGroupError) -> Self {
        Self::Group(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_select_the_right_variant() {
        let not_found = RepositoryError::workflow_not_found(WorkflowId::new());
        assert!(not_found.is_not_found());
        assert!(!not_found.is_transient());

        let transient = RepositoryError::Transient {
            message: "connection refused".to_string(),
        };
        assert!(transient.is_transient());

        let sort = RepositoryError::InvalidSortField {
            field: "owner".to_string(),
        };
        assert!(sort.is_invalid_sort_field());

        let group: RepositoryError = WorkflowGroupError::NoPublishedWorkflow {
            group_id: WorkflowGroupId::new(),
        }
        .into();
        assert!(group.is_group_error());
    }

    #[test]
    fn invalid_sort_field_display_names_allowlist() {
        let err = RepositoryError::InvalidSortField {
            field: "owner".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("owner"));
        assert!(message.contains("created_at"));
    }
}
