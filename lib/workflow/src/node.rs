//! Workflow node types.
//!
//! Nodes are the units of a workflow graph. A node is either a trigger
//! (entry point, activated by a matching source event) or an action
//! (executed by the node-graph executor). Trigger nodes carry the source
//! binding — source ID, provider ID, and event type — that the activator
//! matches incoming source events against.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// A unique identifier for a node within a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Ulid);

impl NodeId {
    /// Creates a new random node ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Creates a node ID from a ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node_{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid_str = s.strip_prefix("node_").unwrap_or(s);
        Ulid::from_str(ulid_str).map(Self)
    }
}

/// The category of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    /// Entry points that receive source events and initiate execution.
    Trigger,
    /// Nodes executed by the node-graph executor (HTTP, transform, log, ...).
    Action,
}

/// A workflow node.
///
/// The `node_type` string selects the concrete behavior
/// (e.g. `trigger:scheduler`, `httprequest`); `config` is the opaque
/// type-specific configuration interpreted by the executor or provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique identifier for this node within the workflow.
    pub id: NodeId,
    /// Human-readable name for this node.
    pub name: String,
    /// The node type discriminator (e.g. `trigger:scheduler`, `httprequest`).
    pub node_type: String,
    /// Whether this is a trigger or an action node.
    pub category: NodeCategory,
    /// Type-specific configuration, opaque to the activation pipeline.
    pub config: JsonValue,
    /// Source identity this trigger listens to (trigger nodes only).
    pub source_id: Option<String>,
    /// Provider identity this trigger listens to (trigger nodes only).
    pub provider_id: Option<String>,
    /// Event type this trigger listens to (trigger nodes only).
    pub event_type: Option<String>,
    /// Whether this node participates in matching/execution.
    pub enabled: bool,
}

impl WorkflowNode {
    /// Creates an action node.
    #[must_use]
    pub fn action(name: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            node_type: node_type.into(),
            category: NodeCategory::Action,
            config: JsonValue::Object(serde_json::Map::new()),
            source_id: None,
            provider_id: None,
            event_type: None,
            enabled: true,
        }
    }

    /// Creates a trigger node bound to a source.
    #[must_use]
    pub fn trigger(
        name: impl Into<String>,
        node_type: impl Into<String>,
        source_id: impl Into<String>,
        provider_id: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            node_type: node_type.into(),
            category: NodeCategory::Trigger,
            config: JsonValue::Object(serde_json::Map::new()),
            source_id: Some(source_id.into()),
            provider_id: Some(provider_id.into()),
            event_type: Some(event_type.into()),
            enabled: true,
        }
    }

    /// Sets the node configuration.
    #[must_use]
    pub fn with_config(mut self, config: JsonValue) -> Self {
        self.config = config;
        self
    }

    /// Returns true if this is a trigger node.
    #[must_use]
    pub fn is_trigger(&self) -> bool {
        self.category == NodeCategory::Trigger
    }

    /// Returns true if all three source-binding fields are present and
    /// non-empty.
    #[must_use]
    pub fn has_source_binding(&self) -> bool {
        fn present(field: &Option<String>) -> bool {
            field.as_deref().is_some_and(|v| !v.is_empty())
        }
        present(&self.source_id) && present(&self.provider_id) && present(&self.event_type)
    }

    /// Returns true if this node can be matched against source events.
    ///
    /// The containing workflow must additionally be published; that half of
    /// the invariant is enforced where workflows are queried.
    #[must_use]
    pub fn is_matchable(&self) -> bool {
        self.is_trigger() && self.enabled && self.has_source_binding()
    }

    /// Returns true if this trigger node's binding equals the given source
    /// identity exactly.
    #[must_use]
    pub fn matches_source(&self, source_id: &str, event_type: &str, provider_id: &str) -> bool {
        self.is_matchable()
            && self.source_id.as_deref() == Some(source_id)
            && self.provider_id.as_deref() == Some(provider_id)
            && self.event_type.as_deref() == Some(event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_display() {
        let id = NodeId::new();
        assert!(id.to_string().starts_with("node_"));
    }

    #[test]
    fn node_id_parse_roundtrip() {
        let id = NodeId::new();
        let parsed: NodeId = id.to_string().parse().expect("should parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn action_node_has_no_source_binding() {
        let node = WorkflowNode::action("Send request", "httprequest");
        assert!(!node.is_trigger());
        assert!(!node.has_source_binding());
        assert!(!node.is_matchable());
    }

    #[test]
    fn trigger_node_is_matchable() {
        let node = WorkflowNode::trigger(
            "Every morning",
            "trigger:scheduler",
            "sched-1",
            "scheduler",
            "ScheduleDue",
        );
        assert!(node.is_matchable());
        assert!(node.matches_source("sched-1", "ScheduleDue", "scheduler"));
    }

    #[test]
    fn disabled_trigger_is_not_matchable() {
        let mut node = WorkflowNode::trigger("t", "trigger:webhook", "hook-1", "webhook", "Call");
        node.enabled = false;
        assert!(!node.is_matchable());
        assert!(!node.matches_source("hook-1", "Call", "webhook"));
    }

    #[test]
    fn empty_source_field_breaks_binding() {
        let mut node = WorkflowNode::trigger("t", "trigger:queue", "q-1", "kafka", "Message");
        node.event_type = Some(String::new());
        assert!(!node.has_source_binding());
        assert!(!node.is_matchable());
    }

    #[test]
    fn matching_is_exact() {
        let node = WorkflowNode::trigger("t", "trigger:scheduler", "sched-1", "scheduler", "Due");
        assert!(!node.matches_source("sched-1", "Due", "webhook"));
        assert!(!node.matches_source("sched-2", "Due", "scheduler"));
    }

    #[test]
    fn node_serde_roundtrip() {
        let node = WorkflowNode::trigger("t", "trigger:scheduler", "s", "p", "E")
            .with_config(serde_json::json!({"interval_seconds": 60}));
        let json = serde_json::to_string(&node).expect("serialize");
        let parsed: WorkflowNode = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(node, parsed);
    }
}
