//! The manager-side implementation of the provider callback.
//!
//! Providers are handed only this sink, which holds nothing but the
//! source-event-bus publisher. Keeping the manager itself out of the
//! closure breaks the manager -> provider -> callback -> manager cycle.

use crate::error::EmitError;
use crate::provider::SourceEventSink;
use async_trait::async_trait;
use operion_bus::SourceEventBus;
use operion_workflow::SourceEvent;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::sync::Arc;
use tracing::debug;

/// Wraps the source-event bus publisher into the callback contract.
pub struct BusSourceEventSink {
    bus: Arc<dyn SourceEventBus>,
}

impl BusSourceEventSink {
    /// Creates a sink publishing to the given bus.
    #[must_use]
    pub fn new(bus: Arc<dyn SourceEventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl SourceEventSink for BusSourceEventSink {
    async fn emit(
        &self,
        source_id: &str,
        provider_id: &str,
        event_type: &str,
        data: JsonMap<String, JsonValue>,
    ) -> Result<(), EmitError> {
        let event = SourceEvent::new(source_id, provider_id, event_type, data);
        event.validate()?;

        self.bus.publish_source_event(&event).await?;
        debug!(source_id, provider_id, event_type, "source event published");
        Ok(())
    }
}
