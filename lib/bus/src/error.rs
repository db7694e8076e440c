//! Error types for the event buses.

use std::fmt;

/// Errors from bus operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Failed to reach or set up the backing broker.
    ConnectionFailed { message: String },
    /// A publish was rejected by the backend.
    PublishFailed { message: String },
    /// The consumer could not be started.
    SubscribeFailed { message: String },
    /// A payload could not be serialized.
    SerializationFailed { message: String },
    /// The bus was closed.
    Closed,
}

impl BusError {
    /// Returns true if this is a publish rejection.
    #[must_use]
    pub fn is_publish_failure(&self) -> bool {
        matches!(self, Self::PublishFailed { .. })
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { message } => {
                write!(f, "bus connection failed: {message}")
            }
            Self::PublishFailed { message } => write!(f, "publish failed: {message}"),
            Self::SubscribeFailed { message } => write!(f, "subscribe failed: {message}"),
            Self::SerializationFailed { message } => {
                write!(f, "payload serialization failed: {message}")
            }
            Self::Closed => write!(f, "bus is closed"),
        }
    }
}

impl std::error::Error for BusError {}

/// An error returned by a registered handler.
///
/// A handler error causes the message to be nacked so the backend
/// redelivers it; handlers therefore return errors only for conditions
/// where redelivery can help (transient repository failures, not
/// validation rejections).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    /// What went wrong.
    pub message: String,
}

impl HandlerError {
    /// Creates a handler error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler failed: {}", self.message)
    }
}

impl std::error::Error for HandlerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_failure_predicate() {
        let err = BusError::PublishFailed {
            message: "broker unavailable".to_string(),
        };
        assert!(err.is_publish_failure());
        assert!(!BusError::Closed.is_publish_failure());
    }

    #[test]
    fn handler_error_display() {
        let err = HandlerError::new("storage unavailable");
        assert!(err.to_string().contains("storage unavailable"));
    }
}
