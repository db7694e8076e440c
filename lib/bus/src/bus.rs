//! Bus traits: the contracts the pipeline stages program against.
//!
//! The traits abstract the broker so the activator, the provider manager,
//! and tests can run against either the NATS JetStream backend or the
//! in-process channel backend.

use crate::error::{BusError, HandlerError};
use async_trait::async_trait;
use operion_workflow::{EventEnvelope, SourceEvent};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use ulid::Ulid;

/// A per-event-type handler on the generic bus.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one envelope. An error nacks the message for redelivery.
    async fn handle(&self, event: EventEnvelope) -> Result<(), HandlerError>;
}

/// A handler on the source-event bus.
#[async_trait]
pub trait SourceEventHandler: Send + Sync {
    /// Handles one source event. An error nacks the message for redelivery.
    async fn handle(&self, event: SourceEvent) -> Result<(), HandlerError>;
}

/// The generic event bus (topic `operion.events`).
///
/// Ordering: messages sharing a routing key are delivered in publish
/// order; messages with different keys may be delivered concurrently.
/// Delivery is at-least-once: a handler error nacks the message and the
/// backend redelivers it.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes an envelope with the given routing key.
    ///
    /// The serialized envelope is sent together with `key` and
    /// `event_type` message headers in one operation.
    async fn publish(&self, key: &str, event: &EventEnvelope) -> Result<(), BusError>;

    /// Registers the handler for an event type. The last registration for
    /// a type wins. Registrations are expected during startup, before
    /// [`subscribe`](Self::subscribe).
    fn handle(&self, event_type: &str, handler: Arc<dyn EventHandler>);

    /// Starts consumption.
    ///
    /// The consumer loop is spawned in the background and this call
    /// returns its task handle once consumption is set up; callers block
    /// on their own shutdown signal. The loop exits when `shutdown`
    /// flips to true, or on repeated fetch failures — watching the
    /// returned handle is how a component notices the latter and asks
    /// its supervisor for a restart.
    async fn subscribe(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, BusError>;

    /// Returns a fresh time-ordered ID, strictly monotonic within the
    /// process. Used for execution IDs and envelope IDs.
    fn generate_id(&self) -> Ulid;

    /// Stops consumption and flushes producers.
    async fn close(&self) -> Result<(), BusError>;
}

/// The source-event bus (topic `operion.source-events`).
///
/// Carries only [`SourceEvent`] payloads; the routing key is always the
/// event's source ID, which gives per-source ordering. Unlike the generic
/// bus it supports multiple handlers: a message is acked only when every
/// handler succeeds.
#[async_trait]
pub trait SourceEventBus: Send + Sync {
    /// Publishes a source event, keyed by its source ID.
    async fn publish_source_event(&self, event: &SourceEvent) -> Result<(), BusError>;

    /// Adds a handler. All registered handlers receive every event.
    fn add_source_event_handler(&self, handler: Arc<dyn SourceEventHandler>);

    /// Starts consumption; same spawn-and-return contract as
    /// [`EventBus::subscribe`].
    async fn subscribe_to_source_events(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, BusError>;

    /// Stops consumption and flushes producers.
    async fn close(&self) -> Result<(), BusError>;
}
