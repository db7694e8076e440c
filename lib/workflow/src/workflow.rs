//! Workflow definition types.
//!
//! A workflow is a versioned automation: an ordered set of nodes, the
//! connections between them, and free-form variables/metadata. Versions of
//! one automation share a `WorkflowGroupId`; at most one version per group
//! is published at a time, and only published workflows participate in
//! trigger matching.

use crate::connection::Connection;
use crate::error::WorkflowDefinitionError;
use crate::node::{NodeId, WorkflowNode};
use chrono::{DateTime, Utc};
use operion_core::{WorkflowGroupId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// The lifecycle status of a workflow version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Editable, not matched against source events.
    Draft,
    /// The single live version of its group.
    Published,
    /// A previously published version that was superseded.
    Unpublished,
}

impl WorkflowStatus {
    /// Returns the storage/wire form of this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Unpublished => "unpublished",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            "unpublished" => Ok(Self::Unpublished),
            other => Err(format!("unknown workflow status '{other}'")),
        }
    }
}

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier for this workflow version.
    pub id: WorkflowId,
    /// Stable identifier shared across versions of this automation.
    pub group_id: WorkflowGroupId,
    /// Human-readable name.
    pub name: String,
    /// Description of what this workflow does.
    pub description: Option<String>,
    /// Lifecycle status of this version.
    pub status: WorkflowStatus,
    /// The nodes of the workflow graph, in definition order.
    pub nodes: Vec<WorkflowNode>,
    /// The connections between node ports, in definition order.
    pub connections: Vec<Connection>,
    /// Workflow-scoped variables, copied into executions by the executor.
    pub variables: JsonMap<String, JsonValue>,
    /// Free-form metadata.
    pub metadata: JsonMap<String, JsonValue>,
    /// The owner of this workflow.
    pub owner: String,
    /// When this version was created.
    pub created_at: DateTime<Utc>,
    /// When this version was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Creates a new draft workflow in a fresh group.
    #[must_use]
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            group_id: WorkflowGroupId::new(),
            name: name.into(),
            description: None,
            status: WorkflowStatus::Draft,
            nodes: Vec::new(),
            connections: Vec::new(),
            variables: JsonMap::new(),
            metadata: JsonMap::new(),
            owner: owner.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Adds a node.
    #[must_use]
    pub fn with_node(mut self, node: WorkflowNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Adds a connection.
    #[must_use]
    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connections.push(connection);
        self
    }

    /// Returns the node with the given ID, if any.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Returns all trigger nodes.
    pub fn trigger_nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.nodes.iter().filter(|n| n.is_trigger())
    }

    /// Returns true if this version is the published one of its group.
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.status == WorkflowStatus::Published
    }

    /// Transitions this version to published.
    pub fn mark_published(&mut self) {
        self.status = WorkflowStatus::Published;
        self.touch();
    }

    /// Transitions this version to unpublished.
    pub fn mark_unpublished(&mut self) {
        self.status = WorkflowStatus::Unpublished;
        self.touch();
    }

    /// Bumps the updated-at timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Validates the structural invariants of this definition.
    ///
    /// # Errors
    ///
    /// Returns an error if node IDs collide or a connection endpoint
    /// references a node outside this workflow.
    pub fn validate(&self) -> Result<(), WorkflowDefinitionError> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id) {
                return Err(WorkflowDefinitionError::DuplicateNodeId { node_id: node.id });
            }
        }

        for connection in &self.connections {
            if !seen.contains(&connection.source_port.node_id) {
                return Err(WorkflowDefinitionError::UnknownSourceNode {
                    connection_id: connection.id,
                    node_id: connection.source_port.node_id,
                });
            }
            if !seen.contains(&connection.target_port.node_id) {
                return Err(WorkflowDefinitionError::UnknownTargetNode {
                    connection_id: connection.id,
                    node_id: connection.target_port.node_id,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::PortRef;

    fn trigger() -> WorkflowNode {
        WorkflowNode::trigger(
            "Schedule",
            "trigger:scheduler",
            "sched-1",
            "scheduler",
            "ScheduleDue",
        )
    }

    #[test]
    fn new_workflow_is_draft() {
        let workflow = Workflow::new("Test", "alice");
        assert_eq!(workflow.status, WorkflowStatus::Draft);
        assert!(!workflow.is_published());
        assert!(workflow.nodes.is_empty());
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            WorkflowStatus::Draft,
            WorkflowStatus::Published,
            WorkflowStatus::Unpublished,
        ] {
            let parsed: WorkflowStatus = status.as_str().parse().expect("should parse");
            assert_eq!(status, parsed);
        }
        assert!("archived".parse::<WorkflowStatus>().is_err());
    }

    #[test]
    fn publish_transition_bumps_updated_at() {
        let mut workflow = Workflow::new("Test", "alice");
        let before = workflow.updated_at;
        workflow.mark_published();
        assert!(workflow.is_published());
        assert!(workflow.updated_at >= before);
    }

    #[test]
    fn trigger_nodes_filters_actions() {
        let workflow = Workflow::new("Test", "alice")
            .with_node(trigger())
            .with_node(WorkflowNode::action("Log", "log"));
        assert_eq!(workflow.trigger_nodes().count(), 1);
    }

    #[test]
    fn validate_accepts_well_formed_workflow() {
        let t = trigger();
        let a = WorkflowNode::action("Log", "log");
        let conn = Connection::with_default_ports(t.id, a.id);
        let workflow = Workflow::new("Test", "alice")
            .with_node(t)
            .with_node(a)
            .with_connection(conn);
        assert!(workflow.validate().is_ok());
    }

    #[test]
    fn validate_rejects_dangling_connection() {
        let t = trigger();
        let t_id = t.id;
        let conn = Connection::new(
            PortRef::new(t_id, "output"),
            PortRef::new(NodeId::new(), "input"),
        );
        let workflow = Workflow::new("Test", "alice")
            .with_node(t)
            .with_connection(conn);

        let err = workflow.validate().unwrap_err();
        assert!(err.is_dangling_connection());
    }

    #[test]
    fn validate_rejects_duplicate_node_ids() {
        let t = trigger();
        let duplicate = t.clone();
        let workflow = Workflow::new("Test", "alice")
            .with_node(t)
            .with_node(duplicate);

        let err = workflow.validate().unwrap_err();
        assert!(matches!(
            err,
            WorkflowDefinitionError::DuplicateNodeId { .. }
        ));
    }

    #[test]
    fn workflow_serde_roundtrip() {
        let workflow = Workflow::new("Serde", "alice").with_node(trigger());
        let json = serde_json::to_string(&workflow).expect("serialize");
        let parsed: Workflow = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(workflow, parsed);
    }
}
