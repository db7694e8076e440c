//! A fixed-interval reference provider.
//!
//! `TickProvider` emits a `Tick` source event for every trigger-node
//! binding addressed to it, on a fixed interval. It exists to exercise
//! the full lifecycle (configure computes a schedule table from the
//! published workflows, start runs an emit loop until cancellation) and
//! to drive the pipeline in tests and local development.

use crate::error::ProviderError;
use crate::provider::{SourceEventSink, SourceProvider};
use crate::registry::ProviderFactory;
use async_trait::async_trait;
use operion_workflow::Workflow;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// The provider identity trigger nodes bind to.
pub const PROVIDER_ID: &str = "tick";

/// The event type this provider emits.
pub const EVENT_TYPE: &str = "Tick";

const DEFAULT_INTERVAL_MS: u64 = 60_000;

/// Emits periodic tick events for each configured source binding.
pub struct TickProvider {
    interval: Duration,
    sources: BTreeSet<String>,
}

impl TickProvider {
    /// Creates a provider ticking at the given interval.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            sources: BTreeSet::new(),
        }
    }
}

#[async_trait]
impl SourceProvider for TickProvider {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    async fn configure(&mut self, workflows: &[Workflow]) -> Result<(), ProviderError> {
        self.sources = workflows
            .iter()
            .filter(|w| w.is_published())
            .flat_map(Workflow::trigger_nodes)
            .filter(|n| n.is_matchable() && n.provider_id.as_deref() == Some(PROVIDER_ID))
            .filter_map(|n| n.source_id.clone())
            .collect();

        info!(sources = self.sources.len(), "tick schedule configured");
        Ok(())
    }

    async fn start(
        &mut self,
        sink: Arc<dyn SourceEventSink>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ProviderError> {
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick of a tokio interval fires immediately; skip it so
        // the first emission happens one interval after start.
        ticker.tick().await;

        let mut count: u64 = 0;
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
                _ = ticker.tick() => {
                    count += 1;
                    for source_id in &self.sources {
                        let mut data = JsonMap::new();
                        data.insert("tick".to_string(), JsonValue::from(count));
                        if let Err(e) = sink
                            .emit(source_id, PROVIDER_ID, EVENT_TYPE, data)
                            .await
                        {
                            // Emission is periodic; the next tick retries.
                            warn!(source_id, error = %e, "tick emission failed");
                        }
                    }
                }
            }
        }
    }
}

/// Factory for [`TickProvider`].
///
/// Recognized config keys: `interval_ms` (default one minute).
pub struct TickProviderFactory;

#[async_trait]
impl ProviderFactory for TickProviderFactory {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    async fn create(
        &self,
        config: JsonMap<String, JsonValue>,
    ) -> Result<Box<dyn SourceProvider>, ProviderError> {
        let interval_ms = match config.get("interval_ms") {
            None => DEFAULT_INTERVAL_MS,
            Some(value) => value.as_u64().ok_or_else(|| ProviderError::Construction {
                provider_id: PROVIDER_ID.to_string(),
                message: format!("interval_ms must be a positive integer, got {value}"),
            })?,
        };
        if interval_ms == 0 {
            return Err(ProviderError::Construction {
                provider_id: PROVIDER_ID.to_string(),
                message: "interval_ms must be greater than zero".to_string(),
            });
        }

        Ok(Box::new(TickProvider::new(Duration::from_millis(
            interval_ms,
        ))))
    }
}
