//! The activator: source events in, node activations out.
//!
//! The activator subscribes to the source-event bus, matches each event
//! against the enabled trigger nodes of all published workflows, persists
//! one execution context per match, and publishes one `node.activation`
//! event per match on the generic bus, keyed
//! `"{trigger_node_id}:{execution_id}"`.
//!
//! Known hazard: when a context is persisted but its activation publish
//! fails, the execution never starts (the failure is logged and siblings
//! continue). Redelivery after a partial failure re-runs the whole match
//! set and creates fresh execution contexts.

use crate::error::RuntimeError;
use crate::supervisor::Restartable;
use async_trait::async_trait;
use operion_bus::{BusError, EventBus, HandlerError, SourceEventBus, SourceEventHandler};
use operion_core::{EventId, ExecutionId, WorkflowId};
use operion_persistence::{ExecutionContextRepository, NodeRepository};
use operion_workflow::{
    EventEnvelope, EventKind, ExecutionContext, SourceEvent, WorkflowNode, WorkflowStatus,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// The input port trigger activations arrive on.
const EXTERNAL_INPUT_PORT: &str = "external";

/// Matches source events to trigger nodes and starts executions.
pub struct Activator {
    id: String,
    handler: Arc<ActivationHandler>,
    source_bus: Arc<dyn SourceEventBus>,
    registered: AtomicBool,
}

impl Activator {
    /// Creates an activator over the given buses and repositories.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        event_bus: Arc<dyn EventBus>,
        source_bus: Arc<dyn SourceEventBus>,
        nodes: Arc<dyn NodeRepository>,
        executions: Arc<dyn ExecutionContextRepository>,
    ) -> Self {
        Self {
            id: id.into(),
            handler: Arc::new(ActivationHandler {
                event_bus,
                nodes,
                executions,
            }),
            source_bus,
            registered: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Restartable for Activator {
    fn name(&self) -> &str {
        &self.id
    }

    async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), RuntimeError> {
        // The handler registration survives restarts on the bus side;
        // register it only on the first start.
        if !self.registered.swap(true, Ordering::SeqCst) {
            self.source_bus
                .add_source_event_handler(Arc::clone(&self.handler) as Arc<dyn SourceEventHandler>);
        }
        let mut consumer = self
            .source_bus
            .subscribe_to_source_events(shutdown.clone())
            .await?;
        info!(activator = %self.id, "activator consuming source events");

        // Consumption runs in the background; block here until shutdown,
        // or until the consumer dies and the supervisor must restart us.
        let mut wait_shutdown = shutdown.clone();
        tokio::select! {
            _ = &mut consumer => {
                if !*shutdown.borrow() {
                    error!(activator = %self.id, "source-event consumer exited");
                    return Err(RuntimeError::Bus(BusError::SubscribeFailed {
                        message: "source-event consumer exited".to_string(),
                    }));
                }
            }
            _ = async move {
                while !*wait_shutdown.borrow() {
                    if wait_shutdown.changed().await.is_err() {
                        break;
                    }
                }
            } => {
                // Graceful stop: the in-flight delivery completes before
                // the consumer winds down.
                let _ = consumer.await;
            }
        }

        info!(activator = %self.id, "activator stopped");
        Ok(())
    }
}

enum ActivationError {
    /// Context persistence failed; the source event must be redelivered.
    Persist(String),
    /// The activation publish failed; log and continue with siblings.
    Publish(String),
}

struct ActivationHandler {
    event_bus: Arc<dyn EventBus>,
    nodes: Arc<dyn NodeRepository>,
    executions: Arc<dyn ExecutionContextRepository>,
}

impl ActivationHandler {
    async fn publish_node_activation(
        &self,
        workflow_id: WorkflowId,
        trigger_node: &WorkflowNode,
        event: &SourceEvent,
    ) -> Result<(), ActivationError> {
        let execution_id = ExecutionId::from(self.event_bus.generate_id());
        let context = ExecutionContext::new(execution_id, workflow_id, event.event_data.clone());
        self.executions
            .save_execution_context(&context)
            .await
            .map_err(|e| ActivationError::Persist(e.to_string()))?;

        let envelope = EventEnvelope::new(
            EventId::from(self.event_bus.generate_id()),
            workflow_id,
            EventKind::NodeActivation {
                execution_id,
                node_id: trigger_node.id,
                published_workflow_id: workflow_id,
                input_port: EXTERNAL_INPUT_PORT.to_string(),
                input_data: event.event_data.clone(),
                source_node: String::new(),
                source_port: String::new(),
            },
        );

        let key = format!("{}:{}", trigger_node.id, execution_id);
        self.event_bus
            .publish(&key, &envelope)
            .await
            .map_err(|e| ActivationError::Publish(e.to_string()))?;

        info!(
            workflow_id = %workflow_id,
            node_id = %trigger_node.id,
            execution_id = %execution_id,
            "node activation published"
        );
        Ok(())
    }
}

#[async_trait]
impl SourceEventHandler for ActivationHandler {
    async fn handle(&self, event: SourceEvent) -> Result<(), HandlerError> {
        if let Err(e) = event.validate() {
            error!(error = %e, "rejecting invalid source event");
            return Err(HandlerError::new(e.to_string()));
        }

        let matches = self
            .nodes
            .find_trigger_nodes(
                &event.source_id,
                &event.event_type,
                &event.provider_id,
                WorkflowStatus::Published,
            )
            .await
            .map_err(|e| HandlerError::new(e.to_string()))?;

        if matches.is_empty() {
            debug!(
                source_id = %event.source_id,
                event_type = %event.event_type,
                "no trigger nodes matched"
            );
            return Ok(());
        }

        for matched in matches {
            match self
                .publish_node_activation(matched.workflow_id, &matched.trigger_node, &event)
                .await
            {
                Ok(()) => {}
                // A failed publish must not prevent sibling activations.
                Err(ActivationError::Publish(message)) => {
                    error!(
                        workflow_id = %matched.workflow_id,
                        node_id = %matched.trigger_node.id,
                        error = %message,
                        "node activation publish failed"
                    );
                }
                Err(ActivationError::Persist(message)) => {
                    return Err(HandlerError::new(message));
                }
            }
        }

        Ok(())
    }
}
