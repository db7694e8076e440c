//! Shared decode pipeline for consumed bus messages.
//!
//! Both bus backends classify each fetched message the same way before
//! dispatch:
//!
//! 1. the `event_type` header is matched against the known discriminators —
//!    unknown types are acked and logged, never dispatched
//! 2. known types are deserialized — payloads that fail are acked and
//!    logged rather than blocking the topic (poison-pill policy)
//! 3. well-formed envelopes are handed to the registered handler

use operion_workflow::{EventEnvelope, EventKind};

/// The classification of a consumed message.
#[derive(Debug)]
pub enum DecodedEvent {
    /// A well-formed envelope of a known type.
    Envelope(Box<EventEnvelope>),
    /// The `event_type` header named no known discriminator (or was absent).
    /// Policy: acknowledge and log.
    UnknownType { event_type: String },
    /// The header named a known type but the payload did not deserialize.
    /// Policy: acknowledge and log (poison pill).
    Malformed { event_type: String, error: String },
}

/// Classifies a consumed message from its `event_type` header and payload.
#[must_use]
pub fn decode_event(event_type: Option<&str>, payload: &[u8]) -> DecodedEvent {
    let Some(event_type) = event_type else {
        return DecodedEvent::UnknownType {
            event_type: "<missing event_type header>".to_string(),
        };
    };

    if !EventKind::is_known_event_type(event_type) {
        return DecodedEvent::UnknownType {
            event_type: event_type.to_string(),
        };
    }

    match EventEnvelope::from_json_bytes(payload) {
        Ok(envelope) => DecodedEvent::Envelope(Box::new(envelope)),
        Err(e) => DecodedEvent::Malformed {
            event_type: event_type.to_string(),
            error: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use operion_core::{EventId, ExecutionId, WorkflowId};

    fn envelope() -> EventEnvelope {
        EventEnvelope::new(
            EventId::new(),
            WorkflowId::new(),
            EventKind::WorkflowExecutionStarted {
                execution_id: ExecutionId::new(),
            },
        )
    }

    #[test]
    fn known_type_with_valid_payload_decodes() {
        let envelope = envelope();
        let bytes = envelope.to_json_bytes().expect("serialize");

        match decode_event(Some("workflow.execution.started"), &bytes) {
            DecodedEvent::Envelope(decoded) => assert_eq!(*decoded, envelope),
            other => panic!("expected envelope, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_classified_without_parsing() {
        match decode_event(Some("workflow.teleported"), b"not even json") {
            DecodedEvent::UnknownType { event_type } => {
                assert_eq!(event_type, "workflow.teleported");
            }
            other => panic!("expected unknown type, got {other:?}"),
        }
    }

    #[test]
    fn missing_header_is_classified_as_unknown() {
        let bytes = envelope().to_json_bytes().expect("serialize");
        assert!(matches!(
            decode_event(None, &bytes),
            DecodedEvent::UnknownType { .. }
        ));
    }

    #[test]
    fn known_type_with_garbage_payload_is_malformed() {
        match decode_event(Some("node.activation"), b"{\"id\": 42}") {
            DecodedEvent::Malformed { event_type, .. } => {
                assert_eq!(event_type, "node.activation");
            }
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn header_wins_over_payload_tag() {
        // A payload whose embedded tag differs from the header is still
        // routed by the header; serde then rejects the mismatch as
        // malformed rather than dispatching the wrong type.
        let bytes = envelope().to_json_bytes().expect("serialize");
        match decode_event(Some("workflow.execution.started"), &bytes) {
            DecodedEvent::Envelope(decoded) => {
                assert_eq!(decoded.event_type(), "workflow.execution.started");
            }
            other => panic!("expected envelope, got {other:?}"),
        }
    }
}
