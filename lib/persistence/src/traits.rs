//! Repository contracts consumed by the pipeline.
//!
//! Every operation takes `&self`, is cancel-safe at its await points, and
//! returns typed [`RepositoryError`]s. Getters return `Option` for plain
//! absence; operations for which absence is a caller error return
//! `NotFound`.

use crate::error::RepositoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use operion_core::{ConnectionId, ExecutionId, WorkflowGroupId, WorkflowId};
use operion_workflow::{
    Connection, ExecutionContext, ExecutionStatus, NodeId, Workflow, WorkflowNode, WorkflowStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::str::FromStr;

/// A sortable field for workflow listings.
///
/// The allowlist is closed: anything else is rejected with
/// [`RepositoryError::InvalidSortField`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Name,
    CreatedAt,
    UpdatedAt,
}

impl SortField {
    /// Parses a requested sort field against the allowlist.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::InvalidSortField`] for any other value.
    pub fn parse(field: &str) -> Result<Self, RepositoryError> {
        field.parse()
    }
}

impl FromStr for SortField {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(Self::Name),
            "created_at" => Ok(Self::CreatedAt),
            "updated_at" => Ok(Self::UpdatedAt),
            other => Err(RepositoryError::InvalidSortField {
                field: other.to_string(),
            }),
        }
    }
}

/// Filtering, sorting, and pagination for workflow listings.
#[derive(Debug, Clone, Default)]
pub struct ListWorkflowsOptions {
    /// Only workflows with this owner.
    pub owner: Option<String>,
    /// Only workflows with this status.
    pub status: Option<WorkflowStatus>,
    /// Requested sort field; `None` sorts by creation time.
    pub sort_by: Option<String>,
    /// Number of results to skip.
    pub offset: u64,
    /// Maximum number of results; `None` means unlimited.
    pub limit: Option<u64>,
}

/// One trigger node that matched a source event, paired with the workflow
/// it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerNodeMatch {
    /// The published workflow containing the matched node.
    pub workflow_id: WorkflowId,
    /// The matched trigger node.
    pub trigger_node: WorkflowNode,
}

/// Per-node-execution input collection state for loop-safe fan-in.
///
/// Owned by the executor; specified here because its storage keys must
/// never collide with execution-context keys. [`storage_key`] carries an
/// `inputs:` prefix and backends keep these records in their own
/// directory/table.
///
/// [`storage_key`]: InputCoordinationState::storage_key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputCoordinationState {
    /// The execution this state belongs to.
    pub execution_id: ExecutionId,
    /// The fan-in node collecting inputs.
    pub node_id: NodeId,
    /// The loop iteration this collection round belongs to.
    pub iteration: u64,
    /// Inputs received so far, keyed by port name.
    pub received: JsonMap<String, JsonValue>,
    /// Whether the collection round is complete.
    pub completed: bool,
    /// When this state was last written.
    pub updated_at: DateTime<Utc>,
}

impl InputCoordinationState {
    /// Creates an empty collection state for iteration zero.
    #[must_use]
    pub fn new(execution_id: ExecutionId, node_id: NodeId) -> Self {
        Self {
            execution_id,
            node_id,
            iteration: 0,
            received: JsonMap::new(),
            completed: false,
            updated_at: Utc::now(),
        }
    }

    /// Returns the collision-free storage key for this state.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!(
            "inputs:{}:{}:{}",
            self.execution_id, self.node_id, self.iteration
        )
    }
}

/// Durable storage of workflow definitions and the group lifecycle.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Returns the workflow with the given ID.
    async fn get_by_id(&self, id: WorkflowId) -> Result<Option<Workflow>, RepositoryError>;

    /// Returns every stored workflow.
    async fn get_all(&self) -> Result<Vec<Workflow>, RepositoryError>;

    /// Creates or replaces a workflow.
    async fn save(&self, workflow: &Workflow) -> Result<(), RepositoryError>;

    /// Deletes a workflow. Returns true if it existed.
    async fn delete(&self, id: WorkflowId) -> Result<bool, RepositoryError>;

    /// Returns the published workflow of a group, if any.
    async fn get_published_workflow(
        &self,
        group_id: WorkflowGroupId,
    ) -> Result<Option<Workflow>, RepositoryError>;

    /// Returns the draft workflow of a group, if any.
    async fn get_draft_workflow(
        &self,
        group_id: WorkflowGroupId,
    ) -> Result<Option<Workflow>, RepositoryError>;

    /// Returns the current workflow of a group: the published version if
    /// one exists, otherwise the draft, otherwise the most recently
    /// updated version.
    async fn get_current_workflow(
        &self,
        group_id: WorkflowGroupId,
    ) -> Result<Option<Workflow>, RepositoryError>;

    /// Publishes a workflow, atomically transitioning the previously
    /// published peer of its group to unpublished. Returns the published
    /// workflow.
    async fn publish_workflow(&self, id: WorkflowId) -> Result<Workflow, RepositoryError>;

    /// Clones the published workflow of a group into a fresh draft
    /// version and returns it.
    async fn create_draft_from_published(
        &self,
        group_id: WorkflowGroupId,
    ) -> Result<Workflow, RepositoryError>;

    /// Lists workflows with filtering, an allowlisted sort field, and
    /// offset/limit pagination.
    async fn list_workflows(
        &self,
        opts: ListWorkflowsOptions,
    ) -> Result<Vec<Workflow>, RepositoryError>;
}

/// Node-granular access to stored workflows, including the
/// activation-critical trigger match.
#[async_trait]
pub trait NodeRepository: Send + Sync {
    /// Returns the nodes of a workflow.
    async fn get_nodes_by_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<WorkflowNode>, RepositoryError>;

    /// Returns one node of a workflow.
    async fn get_node_by_workflow(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
    ) -> Result<Option<WorkflowNode>, RepositoryError>;

    /// Creates or replaces a node within a workflow.
    async fn save_node(
        &self,
        workflow_id: WorkflowId,
        node: &WorkflowNode,
    ) -> Result<(), RepositoryError>;

    /// Deletes a node from a workflow. Returns true if it existed.
    async fn delete_node(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
    ) -> Result<bool, RepositoryError>;

    /// Returns every enabled trigger node across all workflows of the
    /// given status whose source binding equals
    /// `(source_id, event_type, provider_id)` exactly.
    ///
    /// Match order is backend-defined. Production backends serve this
    /// from an index.
    async fn find_trigger_nodes(
        &self,
        source_id: &str,
        event_type: &str,
        provider_id: &str,
        status: WorkflowStatus,
    ) -> Result<Vec<TriggerNodeMatch>, RepositoryError>;
}

/// Access to the connections of stored workflows.
#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    /// Returns the connections of a workflow.
    async fn get_connections_by_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<Connection>, RepositoryError>;

    /// Returns the connections originating at the given node.
    async fn get_connections_by_source_node(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
    ) -> Result<Vec<Connection>, RepositoryError>;

    /// Returns the connections terminating at the given node.
    async fn get_connections_by_target_node(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
    ) -> Result<Vec<Connection>, RepositoryError>;

    /// Creates or replaces a connection within a workflow.
    async fn save_connection(
        &self,
        workflow_id: WorkflowId,
        connection: &Connection,
    ) -> Result<(), RepositoryError>;

    /// Deletes a connection from a workflow. Returns true if it existed.
    async fn delete_connection(
        &self,
        workflow_id: WorkflowId,
        connection_id: ConnectionId,
    ) -> Result<bool, RepositoryError>;
}

/// Durable storage of execution contexts.
#[async_trait]
pub trait ExecutionContextRepository: Send + Sync {
    /// Persists a freshly created execution context.
    async fn save_execution_context(
        &self,
        context: &ExecutionContext,
    ) -> Result<(), RepositoryError>;

    /// Returns an execution context by ID.
    async fn get_execution_context(
        &self,
        id: ExecutionId,
    ) -> Result<Option<ExecutionContext>, RepositoryError>;

    /// Replaces an existing execution context.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the context was never saved.
    async fn update_execution_context(
        &self,
        context: &ExecutionContext,
    ) -> Result<(), RepositoryError>;

    /// Returns every execution of a workflow.
    async fn get_executions_by_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<ExecutionContext>, RepositoryError>;

    /// Returns every execution with the given status.
    async fn get_executions_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<ExecutionContext>, RepositoryError>;
}

/// Storage of per-node-execution input collection state.
#[async_trait]
pub trait InputCoordinationRepository: Send + Sync {
    /// Returns the collection state for a node execution and iteration.
    async fn get_input_state(
        &self,
        execution_id: ExecutionId,
        node_id: NodeId,
        iteration: u64,
    ) -> Result<Option<InputCoordinationState>, RepositoryError>;

    /// Creates or replaces a collection state.
    async fn save_input_state(
        &self,
        state: &InputCoordinationState,
    ) -> Result<(), RepositoryError>;

    /// Deletes every collection state of an execution. Returns the number
    /// of deleted records.
    async fn delete_input_states(
        &self,
        execution_id: ExecutionId,
    ) -> Result<u64, RepositoryError>;
}
