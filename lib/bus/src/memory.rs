//! In-process channel-backed bus backend.
//!
//! Selected with `event-bus-type = memory`. Both topics become unbounded
//! channels drained by one consumer task each, which preserves publish
//! order across all keys (a superset of the per-key ordering guarantee).
//!
//! Redelivery divergence: a broker redelivers nacked messages forever; the
//! in-process backend retries a delivery in place up to
//! [`MAX_DELIVERY_ATTEMPTS`] times and then drops it with an error log, so
//! a permanently failing handler cannot wedge local development runs.

use crate::bus::{EventBus, EventHandler, SourceEventBus, SourceEventHandler};
use crate::codec::{DecodedEvent, decode_event};
use crate::error::{BusError, HandlerError};
use crate::ids::IdGenerator;
use async_trait::async_trait;
use operion_workflow::{EventEnvelope, SourceEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use ulid::Ulid;

/// How many times a delivery is attempted before it is dropped.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 5;

/// A message in flight on an in-process topic.
#[derive(Debug)]
struct Delivery {
    key: String,
    event_type: Option<String>,
    payload: Vec<u8>,
}

fn poisoned<T>(lock: std::sync::PoisonError<T>) -> T {
    lock.into_inner()
}

/// Placeholder consumer handle for a second `subscribe` call while the
/// first consumer is still running; completes at shutdown like the real
/// loop does.
fn idle_until_shutdown(mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
    })
}

/// In-process implementation of the generic event bus.
pub struct MemoryEventBus {
    tx: mpsc::UnboundedSender<Delivery>,
    rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>>,
    handlers: Arc<RwLock<HashMap<String, Arc<dyn EventHandler>>>>,
    ids: IdGenerator,
    closed: AtomicBool,
}

impl MemoryEventBus {
    /// Creates a new in-process generic bus.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(Some(rx))),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            ids: IdGenerator::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueues a raw message, bypassing envelope serialization.
    ///
    /// This is the diagnostic entry point for exercising the unknown-type
    /// and poison-pill paths that a broker backend can produce but
    /// [`publish`](EventBus::publish) cannot.
    pub fn publish_raw(
        &self,
        key: impl Into<String>,
        event_type: Option<&str>,
        payload: Vec<u8>,
    ) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        self.tx
            .send(Delivery {
                key: key.into(),
                event_type: event_type.map(str::to_string),
                payload,
            })
            .map_err(|e| BusError::PublishFailed {
                message: e.to_string(),
            })
    }

    async fn dispatch(
        handlers: &RwLock<HashMap<String, Arc<dyn EventHandler>>>,
        delivery: Delivery,
    ) {
        match decode_event(delivery.event_type.as_deref(), &delivery.payload) {
            DecodedEvent::Envelope(envelope) => {
                let handler = handlers
                    .read()
                    .unwrap_or_else(poisoned)
                    .get(envelope.event_type())
                    .cloned();
                let Some(handler) = handler else {
                    debug!(
                        event_type = envelope.event_type(),
                        "no handler registered, dropping event"
                    );
                    return;
                };

                for attempt in 1..=MAX_DELIVERY_ATTEMPTS {
                    match handler.handle((*envelope).clone()).await {
                        Ok(()) => return,
                        Err(e) if attempt < MAX_DELIVERY_ATTEMPTS => {
                            warn!(
                                event_type = envelope.event_type(),
                                key = %delivery.key,
                                attempt,
                                error = %e,
                                "handler failed, redelivering"
                            );
                        }
                        Err(e) => {
                            error!(
                                event_type = envelope.event_type(),
                                key = %delivery.key,
                                error = %e,
                                "handler failed on final attempt, dropping event"
                            );
                        }
                    }
                }
            }
            DecodedEvent::UnknownType { event_type } => {
                error!(event_type, "skipping event with unknown type");
            }
            DecodedEvent::Malformed { event_type, error } => {
                error!(event_type, error, "skipping unparsable event payload");
            }
        }
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, key: &str, event: &EventEnvelope) -> Result<(), BusError> {
        let payload = event
            .to_json_bytes()
            .map_err(|e| BusError::SerializationFailed {
                message: e.to_string(),
            })?;
        self.publish_raw(key, Some(event.event_type()), payload)
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
        let Some(mut rx) = self.rx.lock().unwrap_or_else(poisoned).take() else {
            debug!("consumer already running");
            return Ok(idle_until_shutdown(shutdown));
        };
        let handlers = Arc::clone(&self.handlers);
        let slot = Arc::clone(&self.rx);

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    delivery = rx.recv() => {
                        let Some(delivery) = delivery else { break };
                        Self::dispatch(&handlers, delivery).await;
                    }
                }
            }
            // Hand the queue back so a restarted component can resume
            // consumption where this consumer left off.
            *slot.lock().unwrap_or_else(poisoned) = Some(rx);
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

/// In-process implementation of the source-event bus.
pub struct MemorySourceEventBus {
    tx: mpsc::UnboundedSender<Delivery>,
    rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>>,
    handlers: Arc<RwLock<Vec<Arc<dyn SourceEventHandler>>>>,
    closed: AtomicBool,
}

impl MemorySourceEventBus {
    /// Creates a new in-process source-event bus.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(Some(rx))),
            handlers: Arc::new(RwLock::new(Vec::new())),
            closed: AtomicBool::new(false),
        }
    }

    async fn dispatch(handlers: &RwLock<Vec<Arc<dyn SourceEventHandler>>>, delivery: Delivery) {
        let event: SourceEvent = match serde_json::from_slice(&delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "skipping unparsable source event");
                return;
            }
        };

        let registered: Vec<_> = handlers.read().unwrap_or_else(poisoned).clone();
        if registered.is_empty() {
            debug!(source_id = %event.source_id, "no source-event handlers registered");
            return;
        }

        // The message is acked only when every handler succeeds; any
        // failure nacks it and all handlers see it again.
        for attempt in 1..=MAX_DELIVERY_ATTEMPTS {
            let mut failed: Option<HandlerError> = None;
            for handler in &registered {
                if let Err(e) = handler.handle(event.clone()).await {
                    failed = Some(e);
                    break;
                }
            }

            match failed {
                None => return,
                Some(e) if attempt < MAX_DELIVERY_ATTEMPTS => {
                    warn!(
                        source_id = %event.source_id,
                        attempt,
                        error = %e,
                        "source-event handler failed, redelivering"
                    );
                }
                Some(e) => {
                    error!(
                        source_id = %event.source_id,
                        error = %e,
                        "source-event handler failed on final attempt, dropping event"
                    );
                }
            }
        }
    }
}

impl Default for MemorySourceEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceEventBus for MemorySourceEventBus {
    async fn publish_source_event(&self, event: &SourceEvent) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        let payload = serde_json::to_vec(event).map_err(|e| BusError::SerializationFailed {
            message: e.to_string(),
        })?;
        self.tx
            .send(Delivery {
                key: event.partition_key().to_string(),
                event_type: None,
                payload,
            })
            .map_err(|e| BusError::PublishFailed {
                message: e.to_string(),
            })
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
        let Some(mut rx) = self.rx.lock().unwrap_or_else(poisoned).take() else {
            debug!("consumer already running");
            return Ok(idle_until_shutdown(shutdown));
        };
        let handlers = Arc::clone(&self.handlers);
        let slot = Arc::clone(&self.rx);

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    delivery = rx.recv() => {
                        let Some(delivery) = delivery else { break };
                        Self::dispatch(&handlers, delivery).await;
                    }
                }
            }
            *slot.lock().unwrap_or_else(poisoned) = Some(rx);
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
    use operion_core::{EventId, ExecutionId, WorkflowId};
    use operion_workflow::EventKind;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct Recorder {
        seen: Mutex<Vec<EventEnvelope>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: EventEnvelope) -> Result<(), HandlerError> {
            self.seen.lock().unwrap().push(event);
            Ok(())
        }
    }

    struct FlakyHandler {
        failures_left: AtomicU32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl EventHandler for FlakyHandler {
        async fn handle(&self, _event: EventEnvelope) -> Result<(), HandlerError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                Err(HandlerError::new("transient"))
            } else {
                Ok(())
            }
        }
    }

    fn started_envelope() -> EventEnvelope {
        EventEnvelope::new(
            EventId::new(),
            WorkflowId::new(),
            EventKind::WorkflowExecutionStarted {
                execution_id: ExecutionId::new(),
            },
        )
    }

    async fn wait_until(check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within timeout");
    }

    #[tokio::test]
    async fn delivers_to_registered_handler() {
        let bus = MemoryEventBus::new();
        let recorder = Recorder::new();
        bus.handle("workflow.execution.started", recorder.clone());

        let (_stop, shutdown) = watch::channel(false);
        let _consumer = bus.subscribe(shutdown).await.unwrap();
        bus.publish("k", &started_envelope()).await.unwrap();

        wait_until(|| recorder.count() == 1).await;
    }

    #[tokio::test]
    async fn preserves_publish_order_per_key() {
        let bus = MemoryEventBus::new();
        let recorder = Recorder::new();
        bus.handle("workflow.execution.started", recorder.clone());

        let mut published = Vec::new();
        for _ in 0..5 {
            let envelope = started_envelope();
            published.push(envelope.id);
            bus.publish("same-key", &envelope).await.unwrap();
        }

        let (_stop, shutdown) = watch::channel(false);
        let _consumer = bus.subscribe(shutdown).await.unwrap();
        wait_until(|| recorder.count() == 5).await;

        let seen: Vec<_> = recorder.seen.lock().unwrap().iter().map(|e| e.id).collect();
        assert_eq!(seen, published);
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let bus = MemoryEventBus::new();
        let first = Recorder::new();
        let second = Recorder::new();
        bus.handle("workflow.execution.started", first.clone());
        bus.handle("workflow.execution.started", second.clone());

        let (_stop, shutdown) = watch::channel(false);
        let _consumer = bus.subscribe(shutdown).await.unwrap();
        bus.publish("k", &started_envelope()).await.unwrap();

        wait_until(|| second.count() == 1).await;
        assert_eq!(first.count(), 0);
    }

    #[tokio::test]
    async fn unknown_type_is_skipped_without_blocking() {
        let bus = MemoryEventBus::new();
        let recorder = Recorder::new();
        bus.handle("workflow.execution.started", recorder.clone());

        let (_stop, shutdown) = watch::channel(false);
        let _consumer = bus.subscribe(shutdown).await.unwrap();

        bus.publish_raw("k", Some("workflow.teleported"), b"{}".to_vec())
            .unwrap();
        bus.publish("k", &started_envelope()).await.unwrap();

        // The unknown event is acked and the next one still arrives.
        wait_until(|| recorder.count() == 1).await;
    }

    #[tokio::test]
    async fn poison_payload_is_committed_not_retried() {
        let bus = MemoryEventBus::new();
        let recorder = Recorder::new();
        bus.handle("workflow.execution.started", recorder.clone());

        let (_stop, shutdown) = watch::channel(false);
        let _consumer = bus.subscribe(shutdown).await.unwrap();

        bus.publish_raw(
            "k",
            Some("workflow.execution.started"),
            b"not json".to_vec(),
        )
        .unwrap();
        bus.publish("k", &started_envelope()).await.unwrap();

        wait_until(|| recorder.count() == 1).await;
    }

    #[tokio::test]
    async fn handler_error_triggers_redelivery() {
        let bus = MemoryEventBus::new();
        let flaky = Arc::new(FlakyHandler {
            failures_left: AtomicU32::new(2),
            attempts: AtomicU32::new(0),
        });
        bus.handle("workflow.execution.started", flaky.clone());

        let (_stop, shutdown) = watch::channel(false);
        let _consumer = bus.subscribe(shutdown).await.unwrap();
        bus.publish("k", &started_envelope()).await.unwrap();

        wait_until(|| flaky.attempts.load(Ordering::SeqCst) == 3).await;
    }

    #[tokio::test]
    async fn closed_bus_rejects_publish() {
        let bus = MemoryEventBus::new();
        bus.close().await.unwrap();
        let err = bus.publish("k", &started_envelope()).await.unwrap_err();
        assert_eq!(err, BusError::Closed);
    }

    struct SourceRecorder {
        seen: Mutex<Vec<SourceEvent>>,
        fail_first: AtomicU32,
    }

    #[async_trait]
    impl SourceEventHandler for SourceRecorder {
        async fn handle(&self, event: SourceEvent) -> Result<(), HandlerError> {
            self.seen.lock().unwrap().push(event);
            if self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                Err(HandlerError::new("transient"))
            } else {
                Ok(())
            }
        }
    }

    fn source_event() -> SourceEvent {
        SourceEvent::new(
            "sched-1",
            "scheduler",
            "ScheduleDue",
            serde_json::Map::new(),
        )
    }

    #[tokio::test]
    async fn all_source_handlers_receive_each_event() {
        let bus = MemorySourceEventBus::new();
        let a = Arc::new(SourceRecorder {
            seen: Mutex::new(Vec::new()),
            fail_first: AtomicU32::new(0),
        });
        let b = Arc::new(SourceRecorder {
            seen: Mutex::new(Vec::new()),
            fail_first: AtomicU32::new(0),
        });
        bus.add_source_event_handler(a.clone());
        bus.add_source_event_handler(b.clone());

        let (_stop, shutdown) = watch::channel(false);
        let _consumer = bus.subscribe_to_source_events(shutdown).await.unwrap();
        bus.publish_source_event(&source_event()).await.unwrap();

        wait_until(|| a.seen.lock().unwrap().len() == 1 && b.seen.lock().unwrap().len() == 1)
            .await;
    }

    #[tokio::test]
    async fn failing_source_handler_nacks_for_all() {
        let bus = MemorySourceEventBus::new();
        let failing = Arc::new(SourceRecorder {
            seen: Mutex::new(Vec::new()),
            fail_first: AtomicU32::new(1),
        });
        bus.add_source_event_handler(failing.clone());

        let (_stop, shutdown) = watch::channel(false);
        let _consumer = bus.subscribe_to_source_events(shutdown).await.unwrap();
        bus.publish_source_event(&source_event()).await.unwrap();

        // First delivery fails, the redelivery succeeds.
        wait_until(|| failing.seen.lock().unwrap().len() == 2).await;
    }
}
