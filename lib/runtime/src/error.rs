//! Error type for the runtime components.

use operion_bus::BusError;
use operion_persistence::RepositoryError;
use operion_provider::ProviderError;
use std::fmt;

/// Errors from running the manager or the activator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// A bus operation failed.
    Bus(BusError),
    /// A repository operation failed.
    Repository(RepositoryError),
    /// A provider failed outside its own abandonment handling.
    Provider(ProviderError),
    /// The configuration is unusable.
    Config { message: String },
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus(e) => write!(f, "bus error: {e}"),
            Self::Repository(e) => write!(f, "repository error: {e}"),
            Self::Provider(e) => write!(f, "provider error: {e}"),
            Self::Config { message } => write!(f, "configuration error: {message}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<BusError> for RuntimeError {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

impl From<RepositoryError> for RuntimeError {
    fn from(e: RepositoryError) -> Self {
        Self::Repository(e)
    }
}

impl From<ProviderError> for RuntimeError {
    fn from(e: ProviderError) -> Self {
        Self::Provider(e)
    }
}
