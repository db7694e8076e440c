//! Error types for the workflow data model.
//!
//! These errors contain only information available at the model layer.
//! Repository- and bus-level context is added by the caller.

use crate::node::NodeId;
use operion_core::ConnectionId;
use std::fmt;

/// A required field of an incoming entity was empty.
///
/// The display form is the wire-level rejection reason, e.g.
/// `source_id_is_required`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field that was empty.
    pub field: &'static str,
}

impl ValidationError {
    /// Creates a validation error for the given field.
    #[must_use]
    pub const fn required(field: &'static str) -> Self {
        Self { field }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_is_required", self.field)
    }
}

impl std::error::Error for ValidationError {}

/// A port reference string did not match the `{node_id}:{port_name}` shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortFormatError {
    /// The offending input.
    pub value: String,
    /// Why parsing failed.
    pub reason: String,
}

impl fmt::Display for PortFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid port reference '{}': {}",
            self.value, self.reason
        )
    }
}

impl std::error::Error for PortFormatError {}

/// Structural problems in a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowDefinitionError {
    /// Two nodes share the same ID.
    DuplicateNodeId { node_id: NodeId },
    /// A connection's source endpoint references a node outside the workflow.
    UnknownSourceNode {
        connection_id: ConnectionId,
        node_id: NodeId,
    },
    /// A connection's target endpoint references a node outside the workflow.
    UnknownTargetNode {
        connection_id: ConnectionId,
        node_id: NodeId,
    },
}

impl WorkflowDefinitionError {
    /// Returns true if this error is about a connection endpoint.
    #[must_use]
    pub fn is_dangling_connection(&self) -> bool {
        matches!(
            self,
            Self::UnknownSourceNode { .. } | Self::UnknownTargetNode { .. }
        )
    }
}

impl fmt::Display for WorkflowDefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateNodeId { node_id } => {
                write!(f, "duplicate node id: {node_id}")
            }
            Self::UnknownSourceNode {
                connection_id,
                node_id,
            } => {
                write!(
                    f,
                    "connection {connection_id} references unknown source node {node_id}"
                )
            }
            Self::UnknownTargetNode {
                connection_id,
                node_id,
            } => {
                write!(
                    f,
                    "connection {connection_id} references unknown target node {node_id}"
                )
            }
        }
    }
}

impl std::error::Error for WorkflowDefinitionError {}
