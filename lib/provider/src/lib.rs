//! Source-provider runtime for the operion platform.
//!
//! Source providers are long-running adapters that observe the outside
//! world (schedulers, webhooks, message queues) and emit normalized
//! source events. This crate defines their lifecycle contract
//! ([`SourceProvider`]), the factory/registry used to construct them
//! ([`ProviderFactory`], [`ProviderRegistry`]), and the callback sink the
//! manager hands to each provider ([`SourceEventSink`]).
//!
//! Concrete production providers (cron, webhook, Kafka) live out of tree;
//! [`TickProvider`] is the in-tree reference implementation.

pub mod callback;
pub mod error;
pub mod provider;
pub mod registry;
pub mod tick;

pub use callback::BusSourceEventSink;
pub use error::{EmitError, ProviderError};
pub use provider::{ProviderDeps, SourceEventSink, SourceProvider};
pub use registry::{ProviderFactory, ProviderRegistry};
pub use tick::{TickProvider, TickProviderFactory};
