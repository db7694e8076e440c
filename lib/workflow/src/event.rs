//! Event envelopes for the generic bus.
//!
//! Every message on the `operion.events` topic is an [`EventEnvelope`]:
//! a common base (id, timestamp, workflow id, optional worker id and
//! metadata) plus one of a closed set of typed payloads discriminated by
//! the `type` field. The same discriminator string travels in the
//! `event_type` message header so consumers can reject unknown types
//! without deserializing the body.

use crate::node::NodeId;
use chrono::{DateTime, Utc};
use operion_core::{EventId, ExecutionId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// The closed set of payloads carried on the generic bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    /// Ask the executor to run one node of one execution.
    #[serde(rename = "node.activation")]
    NodeActivation {
        execution_id: ExecutionId,
        node_id: NodeId,
        published_workflow_id: WorkflowId,
        input_port: String,
        input_data: JsonMap<String, JsonValue>,
        source_node: String,
        source_port: String,
    },
    /// A node finished successfully.
    #[serde(rename = "node.execution.finished")]
    NodeExecutionFinished {
        execution_id: ExecutionId,
        node_id: NodeId,
        output_data: JsonValue,
        #[serde(rename = "duration")]
        duration_ms: u64,
    },
    /// A node failed.
    #[serde(rename = "node.execution.failed")]
    NodeExecutionFailed {
        execution_id: ExecutionId,
        node_id: NodeId,
        error: String,
        #[serde(rename = "duration")]
        duration_ms: u64,
    },
    /// An execution started.
    #[serde(rename = "workflow.execution.started")]
    WorkflowExecutionStarted { execution_id: ExecutionId },
    /// An execution completed.
    #[serde(rename = "workflow.execution.completed")]
    WorkflowExecutionCompleted { execution_id: ExecutionId },
    /// An execution failed.
    #[serde(rename = "workflow.execution.failed")]
    WorkflowExecutionFailed {
        execution_id: ExecutionId,
        error: String,
    },
    /// An execution was cancelled.
    #[serde(rename = "workflow.execution.cancelled")]
    WorkflowExecutionCancelled { execution_id: ExecutionId },
    /// An execution exceeded its deadline.
    #[serde(rename = "workflow.execution.timeout")]
    WorkflowExecutionTimeout { execution_id: ExecutionId },
    /// An execution was paused.
    #[serde(rename = "workflow.execution.paused")]
    WorkflowExecutionPaused { execution_id: ExecutionId },
    /// A paused execution was resumed.
    #[serde(rename = "workflow.execution.resumed")]
    WorkflowExecutionResumed { execution_id: ExecutionId },
    /// Execution-scoped variables changed.
    #[serde(rename = "workflow.variables.updated")]
    WorkflowVariablesUpdated {
        execution_id: ExecutionId,
        updated_variables: JsonMap<String, JsonValue>,
        updated_by: String,
    },
    /// A trigger node was created (configuration plane).
    #[serde(rename = "trigger.created")]
    TriggerCreated { node_id: NodeId },
    /// A trigger node was updated (configuration plane).
    #[serde(rename = "trigger.updated")]
    TriggerUpdated { node_id: NodeId },
    /// A trigger node was deleted (configuration plane).
    #[serde(rename = "trigger.deleted")]
    TriggerDeleted { node_id: NodeId },
    /// A workflow version was published (configuration plane).
    #[serde(rename = "workflow.published")]
    WorkflowPublished {},
    /// A workflow version was unpublished (configuration plane).
    #[serde(rename = "workflow.unpublished")]
    WorkflowUnpublished {},
}

/// Every discriminator the generic bus recognizes, in wire form.
pub const KNOWN_EVENT_TYPES: &[&str] = &[
    "node.activation",
    "node.execution.finished",
    "node.execution.failed",
    "workflow.execution.started",
    "workflow.execution.completed",
    "workflow.execution.failed",
    "workflow.execution.cancelled",
    "workflow.execution.timeout",
    "workflow.execution.paused",
    "workflow.execution.resumed",
    "workflow.variables.updated",
    "trigger.created",
    "trigger.updated",
    "trigger.deleted",
    "workflow.published",
    "workflow.unpublished",
];

impl EventKind {
    /// Returns the wire discriminator for this payload.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::NodeActivation { .. } => "node.activation",
            Self::NodeExecutionFinished { .. } => "node.execution.finished",
            Self::NodeExecutionFailed { .. } => "node.execution.failed",
            Self::WorkflowExecutionStarted { .. } => "workflow.execution.started",
            Self::WorkflowExecutionCompleted { .. } => "workflow.execution.completed",
            Self::WorkflowExecutionFailed { .. } => "workflow.execution.failed",
            Self::WorkflowExecutionCancelled { .. } => "workflow.execution.cancelled",
            Self::WorkflowExecutionTimeout { .. } => "workflow.execution.timeout",
            Self::WorkflowExecutionPaused { .. } => "workflow.execution.paused",
            Self::WorkflowExecutionResumed { .. } => "workflow.execution.resumed",
            Self::WorkflowVariablesUpdated { .. } => "workflow.variables.updated",
            Self::TriggerCreated { .. } => "trigger.created",
            Self::TriggerUpdated { .. } => "trigger.updated",
            Self::TriggerDeleted { .. } => "trigger.deleted",
            Self::WorkflowPublished {} => "workflow.published",
            Self::WorkflowUnpublished {} => "workflow.unpublished",
        }
    }

    /// Returns true if the given discriminator names a known payload type.
    #[must_use]
    pub fn is_known_event_type(event_type: &str) -> bool {
        KNOWN_EVENT_TYPES.contains(&event_type)
    }
}

/// A message on the generic bus: common base fields plus a typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier for this envelope.
    pub id: EventId,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
    /// The workflow this event concerns.
    pub workflow_id: WorkflowId,
    /// The worker that emitted the event, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    /// Free-form envelope metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonMap<String, JsonValue>>,
    /// The typed payload, flattened into the envelope with its `type` tag.
    #[serde(flatten)]
    pub kind: EventKind,
}

impl EventEnvelope {
    /// Creates an envelope with the current timestamp.
    #[must_use]
    pub fn new(id: EventId, workflow_id: WorkflowId, kind: EventKind) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
            workflow_id,
            worker_id: None,
            metadata: None,
            kind,
        }
    }

    /// Sets the worker ID.
    #[must_use]
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    /// Returns the wire discriminator of the payload.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    /// Serializes the envelope to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserializes an envelope from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails or the `type` field is not
    /// a known discriminator.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
