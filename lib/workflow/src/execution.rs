//! Execution context: the persisted run-state record for one execution.
//!
//! The activator creates an execution context in `Running` state when a
//! trigger node matches a source event; the node-graph executor owns the
//! record from then on and is the only writer of status transitions and
//! node results.

use crate::node::NodeId;
use chrono::{DateTime, Utc};
use operion_core::{ExecutionId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;

/// The status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Execution is in progress.
    Running,
    /// All nodes finished successfully.
    Completed,
    /// At least one node failed terminally.
    Failed,
    /// Cancelled by a user or the system.
    Cancelled,
    /// Exceeded its execution deadline.
    Timeout,
    /// Suspended, waiting to be resumed.
    Paused,
}

impl ExecutionStatus {
    /// Returns true if this is a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }
}

/// The recorded outcome of a single node execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    /// The node that produced this result.
    pub node_id: NodeId,
    /// The node's output data.
    pub output: JsonValue,
    /// The error message if the node failed.
    pub error: Option<String>,
    /// When the node finished.
    pub finished_at: DateTime<Utc>,
}

impl NodeResult {
    /// Creates a successful node result.
    #[must_use]
    pub fn success(node_id: NodeId, output: JsonValue) -> Self {
        Self {
            node_id,
            output,
            error: None,
            finished_at: Utc::now(),
        }
    }

    /// Creates a failed node result.
    #[must_use]
    pub fn failure(node_id: NodeId, error: impl Into<String>) -> Self {
        Self {
            node_id,
            output: JsonValue::Null,
            error: Some(error.into()),
            finished_at: Utc::now(),
        }
    }

    /// Returns true if the node succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// The persisted run-state record for one workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Unique, server-generated identifier for this execution.
    pub id: ExecutionId,
    /// The published workflow version this execution runs.
    pub published_workflow_id: WorkflowId,
    /// Current status.
    pub status: ExecutionStatus,
    /// Per-node results keyed by `"{node_id}:{port_name}"` composite keys.
    pub node_results: HashMap<String, NodeResult>,
    /// The source-event data that triggered this execution.
    pub trigger_data: JsonMap<String, JsonValue>,
    /// Execution-scoped variables.
    pub variables: JsonMap<String, JsonValue>,
    /// Free-form metadata.
    pub metadata: JsonMap<String, JsonValue>,
    /// When the execution was created.
    pub created_at: DateTime<Utc>,
    /// When the execution reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionContext {
    /// Creates a new running execution context.
    #[must_use]
    pub fn new(
        id: ExecutionId,
        published_workflow_id: WorkflowId,
        trigger_data: JsonMap<String, JsonValue>,
    ) -> Self {
        Self {
            id,
            published_workflow_id,
            status: ExecutionStatus::Running,
            node_results: HashMap::new(),
            trigger_data,
            variables: JsonMap::new(),
            metadata: JsonMap::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Records the result of a node under the given composite key.
    pub fn record_node_result(&mut self, key: impl Into<String>, result: NodeResult) {
        self.node_results.insert(key.into(), result);
    }

    /// Marks the execution completed.
    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Marks the execution failed.
    pub fn fail(&mut self) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    /// Marks the execution cancelled.
    pub fn cancel(&mut self) {
        self.status = ExecutionStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Marks the execution timed out.
    pub fn timeout(&mut self) {
        self.status = ExecutionStatus::Timeout;
        self.completed_at = Some(Utc::now());
    }

    /// Pauses the execution.
    pub fn pause(&mut self) {
        self.status = ExecutionStatus::Paused;
    }

    /// Resumes a paused execution.
    pub fn resume(&mut self) {
        self.status = ExecutionStatus::Running;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ExecutionContext {
        ExecutionContext::new(ExecutionId::new(), WorkflowId::new(), JsonMap::new())
    }

    #[test]
    fn new_context_is_running_and_empty() {
        let ctx = context();
        assert_eq!(ctx.status, ExecutionStatus::Running);
        assert!(ctx.node_results.is_empty());
        assert!(ctx.variables.is_empty());
        assert!(ctx.completed_at.is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Paused.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(ExecutionStatus::Timeout.is_terminal());
    }

    #[test]
    fn complete_sets_completed_at() {
        let mut ctx = context();
        ctx.complete();
        assert_eq!(ctx.status, ExecutionStatus::Completed);
        assert!(ctx.completed_at.is_some());
    }

    #[test]
    fn pause_and_resume() {
        let mut ctx = context();
        ctx.pause();
        assert_eq!(ctx.status, ExecutionStatus::Paused);
        ctx.resume();
        assert_eq!(ctx.status, ExecutionStatus::Running);
        assert!(ctx.completed_at.is_none());
    }

    #[test]
    fn node_results_keyed_by_composite_key() {
        let mut ctx = context();
        let node_id = NodeId::new();
        ctx.record_node_result(
            format!("{node_id}:output"),
            NodeResult::success(node_id, serde_json::json!({"status": 200})),
        );

        let result = ctx
            .node_results
            .get(&format!("{node_id}:output"))
            .expect("result stored");
        assert!(result.is_success());
    }

    #[test]
    fn failed_node_result_carries_error() {
        let result = NodeResult::failure(NodeId::new(), "connection refused");
        assert!(!result.is_success());
        assert_eq!(result.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn context_serde_roundtrip() {
        let mut trigger_data = JsonMap::new();
        trigger_data.insert("schedule_id".to_string(), serde_json::json!("s1"));
        let ctx = ExecutionContext::new(ExecutionId::new(), WorkflowId::new(), trigger_data);

        let json = serde_json::to_string(&ctx).expect("serialize");
        let parsed: ExecutionContext = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(ctx, parsed);
    }
}
