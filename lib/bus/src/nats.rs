//! NATS JetStream bus backend.
//!
//! Each topic is backed by one JetStream stream with a single subject:
//!
//! - `operion.events` on the `OPERION_EVENTS` stream
//! - `operion.source-events` on the `OPERION_SOURCE_EVENTS` stream
//!
//! Messages within a stream are totally ordered and a durable pull
//! consumer with explicit acks delivers them in that order, which
//! satisfies the per-routing-key ordering guarantee. The routing key and
//! event-type discriminator travel as message headers. A nacked message
//! is redelivered by the server; consumption resumes from the last
//! committed offset after a restart because the consumer is durable.

use crate::bus::{EventBus, EventHandler, SourceEventBus, SourceEventHandler};
use crate::codec::{DecodedEvent, decode_event};
use crate::error::BusError;
use crate::ids::IdGenerator;
use async_nats::jetstream;
use async_nats::jetstream::AckKind;
use async_trait::async_trait;
use futures::StreamExt;
use operion_workflow::{EventEnvelope, SourceEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use ulid::Ulid;

/// Subject for the generic events topic.
const EVENTS_SUBJECT: &str = "operion.events";

/// Subject for the source events topic.
const SOURCE_EVENTS_SUBJECT: &str = "operion.source-events";

/// Stream name for generic events.
const EVENTS_STREAM_NAME: &str = "OPERION_EVENTS";

/// Stream name for source events.
const SOURCE_EVENTS_STREAM_NAME: &str = "OPERION_SOURCE_EVENTS";

/// Header carrying the routing key.
const KEY_HEADER: &str = "key";

/// Header carrying the event-type discriminator.
const EVENT_TYPE_HEADER: &str = "event_type";

/// Consecutive fetch failures tolerated before the consumer exits.
const MAX_FETCH_FAILURES: u32 = 3;

/// Configuration for the NATS-backed buses.
#[derive(Debug, Clone)]
pub struct NatsBusConfig {
    /// NATS server URL.
    pub url: String,
    /// Durable consumer name (one per consuming process role).
    pub consumer_name: String,
    /// Stream name for generic events (defaults to `OPERION_EVENTS`).
    pub events_stream_name: Option<String>,
    /// Stream name for source events (defaults to `OPERION_SOURCE_EVENTS`).
    pub source_events_stream_name: Option<String>,
}

impl NatsBusConfig {
    /// Creates a config with the given URL and consumer name.
    #[must_use]
    pub fn new(url: impl Into<String>, consumer_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            consumer_name: consumer_name.into(),
            events_stream_name: None,
            source_events_stream_name: None,
        }
    }

    fn events_stream(&self) -> &str {
        self.events_stream_name
            .as_deref()
            .unwrap_or(EVENTS_STREAM_NAME)
    }

    fn source_events_stream(&self) -> &str {
        self.source_events_stream_name
            .as_deref()
            .unwrap_or(SOURCE_EVENTS_STREAM_NAME)
    }
}

fn poisoned<T>(lock: std::sync::PoisonError<T>) -> T {
    lock.into_inner()
}

async fn connect_jetstream(url: &str) -> Result<jetstream::Context, BusError> {
    let client = async_nats::connect(url)
        .await
        .map_err(|e| BusError::ConnectionFailed {
            message: e.to_string(),
        })?;
    Ok(jetstream::new(client))
}

async fn ensure_stream(
    jetstream: &jetstream::Context,
    name: &str,
    subject: &str,
) -> Result<(), BusError> {
    let config = jetstream::stream::Config {
        name: name.to_string(),
        subjects: vec![subject.to_string()],
        storage: jetstream::stream::StorageType::File,
        retention: jetstream::stream::RetentionPolicy::Limits,
        ..Default::default()
    };

    jetstream
        .get_or_create_stream(config)
        .await
        .map_err(|e| BusError::ConnectionFailed {
            message: format!("failed to create stream {name}: {e}"),
        })?;

    Ok(())
}

async fn pull_messages(
    jetstream: &jetstream::Context,
    stream_name: &str,
    consumer_name: &str,
) -> Result<jetstream::consumer::pull::Stream, BusError> {
    let stream =
        jetstream
            .get_stream(stream_name)
            .await
            .map_err(|e| BusError::SubscribeFailed {
                message: format!("failed to get stream {stream_name}: {e}"),
            })?;

    let consumer = stream
        .get_or_create_consumer(
            consumer_name,
            jetstream::consumer::pull::Config {
                durable_name: Some(consumer_name.to_string()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| BusError::SubscribeFailed {
            message: format!("failed to create consumer {consumer_name}: {e}"),
        })?;

    consumer
        .messages()
        .await
        .map_err(|e| BusError::SubscribeFailed {
            message: format!("failed to open message stream: {e}"),
        })
}

async fn ack(message: &jetstream::Message) {
    if let Err(e) = message.ack().await {
        warn!(error = %e, "failed to ack message");
    }
}

async fn nack(message: &jetstream::Message) {
    if let Err(e) = message.ack_with(AckKind::Nak(None)).await {
        warn!(error = %e, "failed to nack message");
    }
}

fn header<'m>(message: &'m jetstream::Message, name: &str) -> Option<&'m str> {
    message
        .headers
        .as_ref()
        .and_then(|headers| headers.get(name))
        .map(|value| value.as_str())
}

/// NATS JetStream implementation of the generic event bus.
pub struct NatsEventBus {
    jetstream: jetstream::Context,
    config: NatsBusConfig,
    handlers: Arc<RwLock<HashMap<String, Arc<dyn EventHandler>>>>,
    ids: IdGenerator,
    closed: AtomicBool,
}

impl NatsEventBus {
    /// Connects to NATS and ensures the events stream exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or stream setup fails.
    pub async fn connect(config: NatsBusConfig) -> Result<Self, BusError> {
        let jetstream = connect_jetstream(&config.url).await?;
        ensure_stream(&jetstream, config.events_stream(), EVENTS_SUBJECT).await?;

        Ok(Self {
            jetstream,
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            ids: IdGenerator::new(),
            closed: AtomicBool::new(false),
        })
    }

    async fn dispatch(
        handlers: &RwLock<HashMap<String, Arc<dyn EventHandler>>>,
        message: &jetstream::Message,
    ) {
        match decode_event(header(message, EVENT_TYPE_HEADER), &message.payload) {
            DecodedEvent::Envelope(envelope) => {
                let handler = handlers
                    .read()
                    .unwrap_or_else(poisoned)
                    .get(envelope.event_type())
                    .cloned();
                let Some(handler) = handler else {
                    debug!(
                        event_type = envelope.event_type(),
                        "no handler registered, acking event"
                    );
                    ack(message).await;
                    return;
                };

                match handler.handle(*envelope).await {
                    Ok(()) => ack(message).await,
                    Err(e) => {
                        warn!(error = %e, "handler failed, nacking for redelivery");
                        nack(message).await;
                    }
                }
            }
            DecodedEvent::UnknownType { event_type } => {
                error!(event_type, "skipping event with unknown type");
                ack(message).await;
            }
            DecodedEvent::Malformed { event_type, error } => {
                error!(event_type, error, "skipping unparsable event payload");
                ack(message).await;
            }
        }
    }
}

#[async_trait]
impl EventBus for NatsEventBus {
    async fn publish(&self, key: &str, event: &EventEnvelope) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        let payload = event
            .to_json_bytes()
            .map_err(|e| BusError::SerializationFailed {
                message: e.to_string(),
            })?;

        let mut headers = async_nats::HeaderMap::new();
        headers.insert(KEY_HEADER, key);
        headers.insert(EVENT_TYPE_HEADER, event.event_type());

        self.jetstream
            .publish_with_headers(EVENTS_SUBJECT, headers, payload.into())
            .await
            .map_err(|e| BusError::PublishFailed {
                message: e.to_string(),
            })?
            .await
            .map_err(|e| BusError::PublishFailed {
                message: e.to_string(),
            })?;

        Ok(())
    }

    fn handle(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(poisoned)
            .insert(event_type.to_string(), handler);
    }

    async fn subscribe(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, BusError> {
        let mut messages = pull_messages(
            &self.jetstream,
            self.config.events_stream(),
            &self.config.consumer_name,
        )
        .await?;
        let handlers = Arc::clone(&self.handlers);

        Ok(tokio::spawn(async move {
            let mut fetch_failures = 0u32;
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    next = messages.next() => {
                        match next {
                            None => break,
                            Some(Err(e)) => {
                                fetch_failures += 1;
                                if fetch_failures >= MAX_FETCH_FAILURES {
                                    error!(error = %e, "giving up after repeated fetch failures");
                                    break;
                                }
                                warn!(error = %e, attempt = fetch_failures, "message fetch failed");
                            }
                            Some(Ok(message)) => {
                                fetch_failures = 0;
                                Self::dispatch(&handlers, &message).await;
                            }
                        }
                    }
                }
            }
        }))
    }

    fn generate_id(&self) -> Ulid {
        self.ids.next_id()
    }

    async fn close(&self) -> Result<(), BusError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// NATS JetStream implementation of the source-event bus.
pub struct NatsSourceEventBus {
    jetstream: jetstream::Context,
    config: NatsBusConfig,
    handlers: Arc<RwLock<Vec<Arc<dyn SourceEventHandler>>>>,
    closed: AtomicBool,
}

impl NatsSourceEventBus {
    /// Connects to NATS and ensures the source-events stream exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or stream setup fails.
    pub async fn connect(config: NatsBusConfig) -> Result<Self, BusError> {
        let jetstream = connect_jetstream(&config.url).await?;
        ensure_stream(
            &jetstream,
            config.source_events_stream(),
            SOURCE_EVENTS_SUBJECT,
        )
        .await?;

        Ok(Self {
            jetstream,
            config,
            handlers: Arc::new(RwLock::new(Vec::new())),
            closed: AtomicBool::new(false),
        })
    }

    async fn dispatch(
        handlers: &RwLock<Vec<Arc<dyn SourceEventHandler>>>,
        message: &jetstream::Message,
    ) {
        let event: SourceEvent = match serde_json::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "skipping unparsable source event");
                ack(message).await;
                return;
            }
        };

        let registered: Vec<_> = handlers.read().unwrap_or_else(poisoned).clone();

        // Acked only when every handler succeeds.
        for handler in &registered {
            if let Err(e) = handler.handle(event.clone()).await {
                warn!(
                    source_id = %event.source_id,
                    error = %e,
                    "source-event handler failed, nacking for redelivery"
                );
                nack(message).await;
                return;
            }
        }

        ack(message).await;
    }
}

#[async_trait]
impl SourceEventBus for NatsSourceEventBus {
    async fn publish_source_event(&self, event: &SourceEvent) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        let payload = serde_json::to_vec(event).map_err(|e| BusError::SerializationFailed {
            message: e.to_string(),
        })?;

        let mut headers = async_nats::HeaderMap::new();
        headers.insert(KEY_HEADER, event.partition_key());
        // Informational headers for broker-side inspection.
        headers.insert("source_id", event.source_id.as_str());
        headers.insert("provider_id", event.provider_id.as_str());
        headers.insert("event_type", event.event_type.as_str());

        self.jetstream
            .publish_with_headers(SOURCE_EVENTS_SUBJECT, headers, payload.into())
            .await
            .map_err(|e| BusError::PublishFailed {
                message: e.to_string(),
            })?
            .await
            .map_err(|e| BusError::PublishFailed {
                message: e.to_string(),
            })?;

        Ok(())
    }

    fn add_source_event_handler(&self, handler: Arc<dyn SourceEventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(poisoned)
            .push(handler);
    }

    async fn subscribe_to_source_events(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, BusError> {
        let mut messages = pull_messages(
            &self.jetstream,
            self.config.source_events_stream(),
            &self.config.consumer_name,
        )
        .await?;
        let handlers = Arc::clone(&self.handlers);

        Ok(tokio::spawn(async move {
            let mut fetch_failures = 0u32;
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    next = messages.next() => {
                        match next {
                            None => break,
                            Some(Err(e)) => {
                                fetch_failures += 1;
                                if fetch_failures >= MAX_FETCH_FAILURES {
                                    error!(error = %e, "giving up after repeated fetch failures");
                                    break;
                                }
                                warn!(error = %e, attempt = fetch_failures, "message fetch failed");
                            }
                            Some(Ok(message)) => {
                                fetch_failures = 0;
                                Self::dispatch(&handlers, &message).await;
                            }
                        }
                    }
                }
            }
        }))
    }

    async fn close(&self) -> Result<(), BusError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = NatsBusConfig::new("nats://localhost:4222", "activator-1");
        assert_eq!(config.events_stream(), EVENTS_STREAM_NAME);
        assert_eq!(config.source_events_stream(), SOURCE_EVENTS_STREAM_NAME);
        assert_eq!(config.consumer_name, "activator-1");
    }

    #[test]
    fn config_custom_stream_names() {
        let config = NatsBusConfig {
            url: "nats://localhost:4222".to_string(),
            consumer_name: "manager-1".to_string(),
            events_stream_name: Some("CUSTOM_EVENTS".to_string()),
            source_events_stream_name: Some("CUSTOM_SOURCE".to_string()),
        };
        assert_eq!(config.events_stream(), "CUSTOM_EVENTS");
        assert_eq!(config.source_events_stream(), "CUSTOM_SOURCE");
    }

    #[test]
    fn topic_subjects_are_stable() {
        assert_eq!(EVENTS_SUBJECT, "operion.events");
        assert_eq!(SOURCE_EVENTS_SUBJECT, "operion.source-events");
    }
}
