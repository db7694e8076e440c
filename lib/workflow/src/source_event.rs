//! Source events: normalized announcements from external systems.
//!
//! A source event is the in-flight message a provider emits when it
//! observes something in the outside world (a cron tick, a webhook call,
//! a queue message). It is transient; the only durable traces are the
//! execution contexts the activator derives from it.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// A normalized event from a source provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEvent {
    /// The source this event originated from (partition key).
    pub source_id: String,
    /// The provider that observed the event.
    pub provider_id: String,
    /// The provider-defined event type.
    pub event_type: String,
    /// Event payload, forwarded verbatim as trigger data.
    pub event_data: JsonMap<String, JsonValue>,
}

impl SourceEvent {
    /// Creates a new source event.
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        provider_id: impl Into<String>,
        event_type: impl Into<String>,
        event_data: JsonMap<String, JsonValue>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            provider_id: provider_id.into(),
            event_type: event_type.into(),
            event_data,
        }
    }

    /// Validates that all three identifier fields are non-empty.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] whose display form is
    /// `"{field}_is_required"` for the first empty field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.source_id.is_empty() {
            return Err(ValidationError::required("source_id"));
        }
        if self.provider_id.is_empty() {
            return Err(ValidationError::required("provider_id"));
        }
        if self.event_type.is_empty() {
            return Err(ValidationError::required("event_type"));
        }
        Ok(())
    }

    /// Returns the routing key for the source-event topic.
    #[must_use]
    pub fn partition_key(&self) -> &str {
        &self.source_id
    }
}
