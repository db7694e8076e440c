//! Workflow data model for the operion platform.
//!
//! This crate defines the entities the activation pipeline operates on:
//!
//! - **Workflows**: versioned automation definitions grouped across the
//!   draft/published/unpublished lifecycle
//! - **Nodes**: trigger and action nodes; trigger nodes carry the source
//!   binding used for activation matching
//! - **Connections**: port-to-port links between nodes of one workflow
//! - **Execution contexts**: the persisted run-state record for one execution
//! - **Source events**: normalized announcements from external systems
//! - **Event envelopes**: the closed union of messages on the generic bus

pub mod connection;
pub mod error;
pub mod event;
pub mod execution;
pub mod node;
pub mod source_event;
pub mod workflow;

pub use connection::{Connection, PortRef};
pub use error::{PortFormatError, ValidationError, WorkflowDefinitionError};
pub use event::{EventEnvelope, EventKind};
pub use execution::{ExecutionContext, ExecutionStatus, NodeResult};
pub use node::{NodeCategory, NodeId, WorkflowNode};
pub use source_event::SourceEvent;
pub use workflow::{Workflow, WorkflowStatus};
