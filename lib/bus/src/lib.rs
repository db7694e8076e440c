//! Event routing fabric for the operion platform.
//!
//! Two topical buses carry events between pipeline stages:
//!
//! - the **generic event bus** (`operion.events`) carries the closed union
//!   of [`EventEnvelope`](operion_workflow::EventEnvelope) payloads,
//!   dispatched per event type
//! - the **source-event bus** (`operion.source-events`) carries only
//!   [`SourceEvent`](operion_workflow::SourceEvent) payloads, keyed by
//!   source ID
//!
//! Both provide at-least-once delivery with per-routing-key ordering.
//! Backends: NATS JetStream for deployments, an in-process channel bus for
//! local development and tests.

pub mod bus;
pub mod codec;
pub mod error;
pub mod ids;
pub mod memory;
pub mod nats;

pub use bus::{EventBus, EventHandler, SourceEventBus, SourceEventHandler};
pub use codec::{DecodedEvent, decode_event};
pub use error::{BusError, HandlerError};
pub use ids::IdGenerator;
pub use memory::{MemoryEventBus, MemorySourceEventBus};
pub use nats::{NatsBusConfig, NatsEventBus, NatsSourceEventBus};
