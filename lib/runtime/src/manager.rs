//! The source provider manager.
//!
//! One manager process instantiates the registered (and allowlisted)
//! providers, drives each through its lifecycle in its own task, and
//! wires every provider's callback to the source-event bus. A provider
//! that fails a lifecycle phase is abandoned; the others keep running.
//!
//! Configuration-plane events on the generic bus (`workflow.published`,
//! `workflow.unpublished`, `trigger.*`) make the manager reload the
//! workflow set and re-run each provider's configure phase so schedule
//! and routing tables track the published workflows.

use crate::error::RuntimeError;
use crate::supervisor::Restartable;
use async_trait::async_trait;
use operion_bus::{BusError, EventBus, EventHandler, HandlerError, SourceEventBus};
use operion_provider::{
    BusSourceEventSink, ProviderDeps, ProviderRegistry, SourceEventSink, SourceProvider,
};
use operion_workflow::{EventEnvelope, Workflow};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Generic-bus event types that change provider configuration.
const CONFIGURATION_PLANE_EVENTS: &[&str] = &[
    "workflow.published",
    "workflow.unpublished",
    "trigger.created",
    "trigger.updated",
    "trigger.deleted",
];

/// Instantiates providers and runs them until shutdown.
pub struct SourceProviderManager {
    id: String,
    registry: Arc<ProviderRegistry>,
    allowlist: Vec<String>,
    provider_config: JsonMap<String, JsonValue>,
    deps: ProviderDeps,
    event_bus: Arc<dyn EventBus>,
    source_bus: Arc<dyn SourceEventBus>,
    running: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl SourceProviderManager {
    /// Creates a manager.
    ///
    /// `provider_config` is the configuration mapping handed to every
    /// factory (e.g. the webhook port); `allowlist` selects which
    /// registered providers to activate, empty meaning all.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        registry: Arc<ProviderRegistry>,
        allowlist: Vec<String>,
        provider_config: JsonMap<String, JsonValue>,
        deps: ProviderDeps,
        event_bus: Arc<dyn EventBus>,
        source_bus: Arc<dyn SourceEventBus>,
    ) -> Self {
        Self {
            id: id.into(),
            registry,
            allowlist,
            provider_config,
            deps,
            event_bus,
            source_bus,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl Restartable for SourceProviderManager {
    fn name(&self) -> &str {
        &self.id
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), RuntimeError> {
        let initial = self.deps.workflow_repository.get_all().await?;
        let (workflow_tx, workflow_rx) = watch::channel(initial);

        // Configuration-plane events just poke the reload channel; the
        // workflow set itself is re-read from the repository.
        let (reload_tx, mut reload_rx) = mpsc::unbounded_channel();
        let notifier = Arc::new(ConfigurationPlaneHandler { reload: reload_tx });
        for event_type in CONFIGURATION_PLANE_EVENTS {
            self.event_bus
                .handle(event_type, Arc::clone(&notifier) as Arc<dyn EventHandler>);
        }
        let mut events_consumer = self.event_bus.subscribe(shutdown.clone()).await?;

        let sink: Arc<dyn SourceEventSink> =
            Arc::new(BusSourceEventSink::new(Arc::clone(&self.source_bus)));

        for factory in self.registry.select(&self.allowlist) {
            let provider_id = factory.provider_id().to_string();
            match factory.create(self.provider_config.clone()).await {
                Err(e) => {
                    // Abandon this instance only.
                    error!(provider_id, error = %e, "provider construction failed");
                }
                Ok(provider) => {
                    let task = tokio::spawn(run_provider(
                        provider,
                        self.deps.clone(),
                        Arc::clone(&sink),
                        workflow_rx.clone(),
                        shutdown.clone(),
                    ));
                    self.running
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(provider_id, task);
                }
            }
        }

        let launched = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len();
        info!(manager = %self.id, providers = launched, "source provider manager started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = &mut events_consumer => {
                    if !*shutdown.borrow() {
                        // Provider tasks wind down once the supervisor
                        // drops the stop channel for this run.
                        error!(manager = %self.id, "generic-bus consumer exited");
                        return Err(RuntimeError::Bus(BusError::SubscribeFailed {
                            message: "generic-bus consumer exited".to_string(),
                        }));
                    }
                    break;
                }
                notified = reload_rx.recv() => {
                    if notified.is_none() {
                        break;
                    }
                    match self.deps.workflow_repository.get_all().await {
                        Ok(current) => {
                            debug!(workflows = current.len(), "reloading provider configuration");
                            let _ = workflow_tx.send(current);
                        }
                        Err(e) => {
                            warn!(error = %e, "workflow reload failed, keeping previous configuration");
                        }
                    }
                }
            }
        }

        // Drain provider tasks before returning so restart gets a clean
        // slate.
        let tasks: Vec<(String, JoinHandle<()>)> = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (provider_id, task) in tasks {
            if let Err(e) = task.await {
                warn!(provider_id, error = %e, "provider task panicked");
            }
        }

        info!(manager = %self.id, "source provider manager stopped");
        Ok(())
    }
}

/// Forwards configuration-plane events into the reload channel.
struct ConfigurationPlaneHandler {
    reload: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl EventHandler for ConfigurationPlaneHandler {
    async fn handle(&self, event: EventEnvelope) -> Result<(), HandlerError> {
        debug!(event_type = event.event_type(), "configuration plane changed");
        self.reload
            .send(())
            .map_err(|_| HandlerError::new("manager reload channel closed"))
    }
}

/// What happened inside one provider's select loop.
enum ProviderStep {
    Finished(Result<(), operion_provider::ProviderError>),
    Reconfigure,
    Halt,
}

/// Drives one provider instance through its lifecycle until shutdown.
async fn run_provider(
    mut provider: Box<dyn SourceProvider>,
    deps: ProviderDeps,
    sink: Arc<dyn SourceEventSink>,
    mut workflows: watch::Receiver<Vec<Workflow>>,
    shutdown: watch::Receiver<bool>,
) {
    let provider_id = provider.provider_id().to_string();

    if let Err(e) = provider.initialize(deps).await {
        error!(provider_id, phase = e.phase(), error = %e, "provider abandoned");
        return;
    }
    let current = workflows.borrow().clone();
    if let Err(e) = provider.configure(&current).await {
        error!(provider_id, phase = e.phase(), error = %e, "provider abandoned");
        return;
    }
    if let Err(e) = provider.prepare().await {
        error!(provider_id, phase = e.phase(), error = %e, "provider abandoned");
        return;
    }

    info!(provider_id, "provider started");
    loop {
        // A receiver cloned after the flag flipped never observes a
        // change; check the current value before blocking in start.
        if *shutdown.borrow() {
            break;
        }
        let step = tokio::select! {
            result = provider.start(Arc::clone(&sink), shutdown.clone()) => {
                ProviderStep::Finished(result)
            }
            changed = workflows.changed() => {
                if changed.is_ok() { ProviderStep::Reconfigure } else { ProviderStep::Halt }
            }
        };

        match step {
            ProviderStep::Finished(Ok(())) => break,
            ProviderStep::Finished(Err(e)) => {
                error!(provider_id, error = %e, "provider failed while running");
                break;
            }
            ProviderStep::Halt => break,
            ProviderStep::Reconfigure => {
                // The start future was dropped at its last await point;
                // give the provider its stop/configure pass before
                // re-entering start.
                if let Err(e) = provider.stop().await {
                    warn!(provider_id, error = %e, "provider stop failed during reconfigure");
                }
                let current = workflows.borrow_and_update().clone();
                if let Err(e) = provider.configure(&current).await {
                    error!(provider_id, phase = e.phase(), error = %e, "provider abandoned");
                    return;
                }
                debug!(provider_id, "provider reconfigured");
            }
        }
    }

    if let Err(e) = provider.stop().await {
        warn!(provider_id, error = %e, "provider stop failed");
    }
    info!(provider_id, "provider stopped");
}
