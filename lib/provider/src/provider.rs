//! The source-provider lifecycle contract.
//!
//! The manager drives each provider instance through five phases in
//! order: construct (via its factory), initialize, configure, prepare,
//! start. A failure at any phase abandons the instance. The trait ships
//! no-op defaults for initialize/configure/prepare/stop so minimal
//! providers effectively skip from construct to start.

use crate::error::{EmitError, ProviderError};
use async_trait::async_trait;
use operion_persistence::WorkflowRepository;
use operion_workflow::Workflow;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::sync::Arc;
use tokio::sync::watch;

/// The callback through which providers emit source events.
///
/// The manager's implementation constructs a `SourceEvent`, validates it,
/// and publishes it to the source-event bus. Publish errors come back to
/// the provider, which decides whether to retry internally.
#[async_trait]
pub trait SourceEventSink: Send + Sync {
    /// Emits one source event.
    async fn emit(
        &self,
        source_id: &str,
        provider_id: &str,
        event_type: &str,
        data: JsonMap<String, JsonValue>,
    ) -> Result<(), EmitError>;
}

/// Dependencies handed to providers during the initialize phase.
#[derive(Clone)]
pub struct ProviderDeps {
    /// Read access to stored workflows.
    pub workflow_repository: Arc<dyn WorkflowRepository>,
}

/// A long-running adapter that observes an external system and emits
/// source events.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// The stable provider identity used in trigger-node bindings.
    fn provider_id(&self) -> &str;

    /// Receives dependencies. Default: no-op.
    async fn initialize(&mut self, _deps: ProviderDeps) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Receives the current workflow set so the provider can compute its
    /// internal schedule/routing tables. Called again when the
    /// configuration plane changes. Default: no-op.
    async fn configure(&mut self, _workflows: &[Workflow]) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Reserves external resources (bind ports, open consumers).
    /// Default: no-op.
    async fn prepare(&mut self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Emits events through `sink` until `shutdown` flips to true.
    async fn start(
        &mut self,
        sink: Arc<dyn SourceEventSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), ProviderError>;

    /// Releases resources after `start` returns. Default: no-op.
    async fn stop(&mut self) -> Result<(), ProviderError> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn SourceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceProvider")
            .field("provider_id", &self.provider_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A provider implementing only the mandatory surface; the lifecycle
    /// defaults carry it from construct straight to start.
    struct MinimalProvider;

    #[async_trait]
    impl SourceProvider for MinimalProvider {
        fn provider_id(&self) -> &str {
            "minimal"
        }

        async fn start(
            &mut self,
            _sink: Arc<dyn SourceEventSink>,
            mut shutdown: watch::Receiver<bool>,
        ) -> Result<(), ProviderError> {
            let _ = shutdown.changed().await;
            Ok(())
        }
    }

    struct NullSink;

    #[async_trait]
    impl SourceEventSink for NullSink {
        async fn emit(
            &self,
            _source_id: &str,
            _provider_id: &str,
            _event_type: &str,
            _data: JsonMap<String, JsonValue>,
        ) -> Result<(), EmitError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn default_lifecycle_phases_are_noops() {
        let mut provider = MinimalProvider;
        assert!(provider.configure(&[]).await.is_ok());
        assert!(provider.prepare().await.is_ok());
        assert!(provider.stop().await.is_ok());
    }

    #[tokio::test]
    async fn start_runs_until_shutdown() {
        let mut provider = MinimalProvider;
        let (stop, shutdown) = watch::channel(false);

        let run = tokio::spawn(async move { provider.start(Arc::new(NullSink), shutdown).await });

        stop.send(true).expect("send shutdown");
        run.await.expect("join").expect("provider result");
    }
}
