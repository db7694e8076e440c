//! The application context: every shared dependency, built once in `main`.
//!
//! Storage backend and bus backend are selected from configuration here;
//! everything downstream receives trait objects and stays backend
//! agnostic. There is no process-global state.

use crate::config::{EventBusType, OperionConfig};
use crate::error::RuntimeError;
use operion_bus::{
    EventBus, MemoryEventBus, MemorySourceEventBus, NatsBusConfig, NatsEventBus,
    NatsSourceEventBus, SourceEventBus,
};
use operion_persistence::{
    ConnectionRepository, ExecutionContextRepository, FileStore, InputCoordinationRepository,
    NodeRepository, PgStore, WorkflowRepository,
};
use std::sync::Arc;
use tracing::info;

/// The dependency container for one operion process.
#[derive(Clone)]
pub struct ApplicationContext {
    pub workflows: Arc<dyn WorkflowRepository>,
    pub nodes: Arc<dyn NodeRepository>,
    pub connections: Arc<dyn ConnectionRepository>,
    pub executions: Arc<dyn ExecutionContextRepository>,
    pub input_coordination: Arc<dyn InputCoordinationRepository>,
    pub event_bus: Arc<dyn EventBus>,
    pub source_bus: Arc<dyn SourceEventBus>,
}

impl ApplicationContext {
    /// Builds the context from configuration.
    ///
    /// `consumer_name` becomes the durable consumer identity on broker
    /// backends, so each process role consumes from its own offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage or bus backend cannot be reached.
    pub async fn build(
        config: &OperionConfig,
        consumer_name: &str,
    ) -> Result<Self, RuntimeError> {
        let (workflows, nodes, connections, executions, input_coordination) =
            match config.file_backend_path() {
                Some(path) => {
                    info!(path, "using filesystem persistence");
                    let store = FileStore::open(path).await?;
                    (
                        Arc::new(store.clone()) as Arc<dyn WorkflowRepository>,
                        Arc::new(store.clone()) as Arc<dyn NodeRepository>,
                        Arc::new(store.clone()) as Arc<dyn ConnectionRepository>,
                        Arc::new(store.clone()) as Arc<dyn ExecutionContextRepository>,
                        Arc::new(store) as Arc<dyn InputCoordinationRepository>,
                    )
                }
                None => {
                    info!("using postgres persistence");
                    let store = PgStore::connect(&config.database_url).await?;
                    store.migrate().await?;
                    (
                        Arc::new(store.clone()) as Arc<dyn WorkflowRepository>,
                        Arc::new(store.clone()) as Arc<dyn NodeRepository>,
                        Arc::new(store.clone()) as Arc<dyn ConnectionRepository>,
                        Arc::new(store.clone()) as Arc<dyn ExecutionContextRepository>,
                        Arc::new(store) as Arc<dyn InputCoordinationRepository>,
                    )
                }
            };

        let (event_bus, source_bus) = match config.event_bus_type {
            EventBusType::Memory => {
                info!("using in-process event buses");
                (
                    Arc::new(MemoryEventBus::new()) as Arc<dyn EventBus>,
                    Arc::new(MemorySourceEventBus::new()) as Arc<dyn SourceEventBus>,
                )
            }
            EventBusType::Nats => {
                info!(url = %config.nats_url, "using NATS event buses");
                let bus_config = NatsBusConfig::new(&config.nats_url, consumer_name);
                (
                    Arc::new(NatsEventBus::connect(bus_config.clone()).await?)
                        as Arc<dyn EventBus>,
                    Arc::new(NatsSourceEventBus::connect(bus_config).await?)
                        as Arc<dyn SourceEventBus>,
                )
            }
        };

        Ok(Self {
            workflows,
            nodes,
            connections,
            executions,
            input_coordination,
            event_bus,
            source_bus,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activator::Activator;
    use crate::manager::SourceProviderManager;
    use crate::supervisor::Restartable;
    use async_trait::async_trait;
    use operion_bus::{EventHandler, HandlerError};
    use operion_provider::{ProviderDeps, ProviderRegistry, TickProviderFactory};
    use operion_workflow::{
        EventEnvelope, EventKind, ExecutionStatus, Workflow, WorkflowNode,
    };
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::watch;

    fn config(database_url: String) -> OperionConfig {
        serde_json::from_value(serde_json::json!({
            "database_url": database_url,
            "event_bus_type": "memory"
        }))
        .expect("deserialize config")
    }

    #[tokio::test]
    async fn builds_file_backed_context() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(format!("file://{}", dir.path().display()));

        let context = ApplicationContext::build(&config, "test-consumer")
            .await
            .expect("build context");

        // Repositories share the same store; a workflow saved through one
        // trait is visible through another.
        let workflow = operion_workflow::Workflow::new("wf", "alice");
        context.workflows.save(&workflow).await.unwrap();
        let nodes = context.nodes.get_nodes_by_workflow(workflow.id).await.unwrap();
        assert!(nodes.is_empty());

        let id = context.event_bus.generate_id();
        assert!(context.event_bus.generate_id() > id);
    }

    struct ActivationRecorder {
        seen: Mutex<Vec<EventEnvelope>>,
    }

    #[async_trait]
    impl EventHandler for ActivationRecorder {
        async fn handle(&self, event: EventEnvelope) -> Result<(), HandlerError> {
            self.seen.lock().unwrap().push(event);
            Ok(())
        }
    }

    /// The whole pipeline against one context: the tick provider emits a
    /// source event, the activator persists an execution context and
    /// publishes a node activation on the generic bus.
    #[tokio::test]
    async fn pipeline_turns_ticks_into_node_activations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(format!("file://{}", dir.path().display()));
        let context = ApplicationContext::build(&config, "pipeline-test")
            .await
            .expect("build context");

        let workflow = Workflow::new("Tick report", "alice").with_node(WorkflowNode::trigger(
            "Every tick",
            "trigger:tick",
            "tick-1",
            "tick",
            "Tick",
        ));
        let trigger_id = workflow.nodes[0].id;
        context.workflows.save(&workflow).await.unwrap();
        context.workflows.publish_workflow(workflow.id).await.unwrap();

        let recorder = Arc::new(ActivationRecorder {
            seen: Mutex::new(Vec::new()),
        });
        context
            .event_bus
            .handle("node.activation", recorder.clone());

        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(TickProviderFactory));
        let mut provider_config = serde_json::Map::new();
        provider_config.insert("interval_ms".to_string(), serde_json::json!(5));

        let manager = SourceProviderManager::new(
            "manager-pipeline",
            Arc::new(registry),
            Vec::new(),
            provider_config,
            ProviderDeps {
                workflow_repository: Arc::clone(&context.workflows),
            },
            Arc::clone(&context.event_bus),
            Arc::clone(&context.source_bus),
        );
        let activator = Activator::new(
            "activator-pipeline",
            Arc::clone(&context.event_bus),
            Arc::clone(&context.source_bus),
            Arc::clone(&context.nodes),
            Arc::clone(&context.executions),
        );

        let (stop, shutdown) = watch::channel(false);
        let manager_run = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { manager.run(shutdown).await })
        };
        let activator_run = tokio::spawn(async move { activator.run(shutdown).await });

        for _ in 0..400 {
            if !recorder.seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        stop.send(true).unwrap();
        manager_run.await.unwrap().unwrap();
        activator_run.await.unwrap().unwrap();

        let executions = context
            .executions
            .get_executions_by_status(ExecutionStatus::Running)
            .await
            .unwrap();
        assert!(!executions.is_empty());
        assert_eq!(executions[0].published_workflow_id, workflow.id);

        let seen = recorder.seen.lock().unwrap();
        assert!(!seen.is_empty());
        match &seen[0].kind {
            EventKind::NodeActivation {
                node_id,
                published_workflow_id,
                input_port,
                input_data,
                ..
            } => {
                assert_eq!(*node_id, trigger_id);
                assert_eq!(*published_workflow_id, workflow.id);
                assert_eq!(input_port, "external");
                assert!(input_data.contains_key("tick"));
            }
            other => panic!("expected node activation, got {other:?}"),
        }
    }
}
