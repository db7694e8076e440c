//! Error types for the source-provider runtime.

use operion_bus::BusError;
use operion_workflow::ValidationError;
use std::fmt;

/// Errors from provider construction and lifecycle phases.
///
/// A phase failure abandons the provider instance; other providers keep
/// running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// No factory is registered under the requested ID.
    UnknownProvider { provider_id: String },
    /// The factory failed to build the instance.
    Construction {
        provider_id: String,
        message: String,
    },
    /// The initialize phase failed.
    Initialization {
        provider_id: String,
        message: String,
    },
    /// The configure phase failed.
    Configuration {
        provider_id: String,
        message: String,
    },
    /// The prepare phase failed (ports, consumers, external resources).
    Preparation {
        provider_id: String,
        message: String,
    },
    /// The provider failed while running.
    Runtime {
        provider_id: String,
        message: String,
    },
}

impl ProviderError {
    /// Returns the provider the error belongs to.
    #[must_use]
    pub fn provider_id(&self) -> &str {
        match self {
            Self::UnknownProvider { provider_id }
            | Self::Construction { provider_id, .. }
            | Self::Initialization { provider_id, .. }
            | Self::Configuration { provider_id, .. }
            | Self::Preparation { provider_id, .. }
            | Self::Runtime { provider_id, .. } => provider_id,
        }
    }

    /// Returns the lifecycle phase the error belongs to.
    #[must_use]
    pub fn phase(&self) -> &'static str {
        match self {
            Self::UnknownProvider { .. } | Self::Construction { .. } => "construct",
            Self::Initialization { .. } => "initialize",
            Self::Configuration { .. } => "configure",
            Self::Preparation { .. } => "prepare",
            Self::Runtime { .. } => "start",
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownProvider { provider_id } => {
                write!(f, "unknown provider: {provider_id}")
            }
            Self::Construction {
                provider_id,
                message,
            } => write!(f, "provider {provider_id} construction failed: {message}"),
            Self::Initialization {
                provider_id,
                message,
            } => write!(f, "provider {provider_id} initialization failed: {message}"),
            Self::Configuration {
                provider_id,
                message,
            } => write!(f, "provider {provider_id} configuration failed: {message}"),
            Self::Preparation {
                provider_id,
                message,
            } => write!(f, "provider {provider_id} preparation failed: {message}"),
            Self::Runtime {
                provider_id,
                message,
            } => write!(f, "provider {provider_id} failed: {message}"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Errors returned to a provider through the emit callback.
///
/// The provider decides whether to retry internally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitError {
    /// The constructed source event failed validation.
    Validation(ValidationError),
    /// The source-event bus rejected the publish.
    Publish(BusError),
}

impl fmt::Display for EmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(e) => write!(f, "source event rejected: {e}"),
            Self::Publish(e) => write!(f, "source event publish failed: {e}"),
        }
    }
}

impl std::error::Error for EmitError {}

impl From<ValidationError> for EmitError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<BusError> for EmitError {
    fn from(e: BusError) -> Self {
        Self::Publish(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_reports_phase_and_provider() {
        let err = ProviderError::Preparation {
            provider_id: "webhook".to_string(),
            message: "port 8085 in use".to_string(),
        };
        assert_eq!(err.phase(), "prepare");
        assert_eq!(err.provider_id(), "webhook");
        assert!(err.to_string().contains("port 8085"));
    }

    #[test]
    fn emit_error_wraps_validation() {
        let err: EmitError = ValidationError::required("source_id").into();
        assert!(err.to_string().contains("source_id_is_required"));
    }
}
