//! Long-running pipeline components for the operion platform.
//!
//! - [`Activator`]: turns matched source events into execution contexts
//!   and node-activation events
//! - [`SourceProviderManager`]: constructs providers, drives their
//!   lifecycle, and wires their callbacks to the source-event bus
//! - [`Supervisor`]: signal handling and bounded restart for both
//! - [`OperionConfig`] and [`ApplicationContext`]: the configuration
//!   surface and the dependency container built once in `main`

pub mod activator;
pub mod config;
pub mod context;
pub mod error;
pub mod manager;
pub mod supervisor;

pub use activator::Activator;
pub use config::{EventBusType, LogLevel, OperionConfig};
pub use context::ApplicationContext;
pub use error::RuntimeError;
pub use manager::SourceProviderManager;
pub use supervisor::{Restartable, Signal, Supervisor, SupervisorVerdict, os_signals};
