//! Event trait and persisted event shapes.
//!
//! Events represent immutable facts about an aggregate. They are the source
//! of truth in the system: write models and projections are both folds over
//! the event stream.
//!
//! # Payload format
//!
//! Event payloads are stored as JSON. The log treats them as opaque; only
//! the owning domain crate knows how to decode a given `event_type`.
//!
//! # Example
//!
//! ```
//! use portcullis_core::event::Event;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! enum SessionEvent {
//!     Added { creator: String },
//!     Terminated,
//! }
//!
//! impl Event for SessionEvent {
//!     fn event_type(&self) -> &'static str {
//!         match self {
//!             SessionEvent::Added { .. } => "session.added",
//!             SessionEvent::Terminated => "session.terminated",
//!         }
//!     }
//! }
//! ```

use crate::aggregate::{Aggregate, GlobalPosition, Sequence};
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Error types for event operations.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize an event payload.
    #[error("Failed to serialize event: {0}")]
    Serialization(String),

    /// Failed to deserialize an event payload.
    #[error("Failed to deserialize event: {0}")]
    Deserialization(String),

    /// Unknown event type encountered during deserialization.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// A domain event that can be appended to the log and replayed.
///
/// # Event naming
///
/// `event_type()` returns the stable dotted identifier persisted with the
/// event, e.g. `"session.added"` or `"session.webauthn.checked"`. The name
/// is the contract; renaming one is a breaking schema change.
pub trait Event: Send + Sync + 'static {
    /// Returns the stable event type identifier for this event.
    fn event_type(&self) -> &'static str;

    /// Serialize this event's payload to JSON.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the payload cannot be
    /// represented as JSON.
    fn to_payload(&self) -> Result<serde_json::Value, EventError>
    where
        Self: Serialize,
    {
        serde_json::to_value(self).map_err(|e| EventError::Serialization(e.to_string()))
    }

    /// Deserialize an event from a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialization`] if the payload does not match
    /// this event type's schema.
    fn from_payload(payload: serde_json::Value) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        serde_json::from_value(payload).map_err(|e| EventError::Deserialization(e.to_string()))
    }
}

/// An event ready to be pushed, before the log has assigned ordering.
///
/// Pending events carry everything the command side knows; the store fills
/// in `sequence`, `position`, and `created_at` at commit time.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingEvent {
    /// The event type identifier (e.g. `"session.added"`).
    pub event_type: String,
    /// User (or service) that caused the event.
    pub creator: String,
    /// Opaque JSON payload.
    pub payload: serde_json::Value,
}

impl PendingEvent {
    /// Create a new pending event.
    #[must_use]
    pub const fn new(event_type: String, creator: String, payload: serde_json::Value) -> Self {
        Self {
            event_type,
            creator,
            payload,
        }
    }

    /// Create a pending event from an [`Event`] value.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the payload cannot be
    /// serialized.
    pub fn from_event<E: Event + Serialize>(event: &E, creator: &str) -> Result<Self, EventError> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            creator: creator.to_string(),
            payload: event.to_payload()?,
        })
    }
}

/// An event as persisted in the log, with assigned ordering.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredEvent {
    /// The aggregate the event belongs to.
    pub aggregate: Aggregate,
    /// The event type identifier.
    pub event_type: String,
    /// Per-aggregate sequence, strictly increasing from 1 with no gaps.
    pub sequence: Sequence,
    /// Position in the log across all aggregates.
    pub position: GlobalPosition,
    /// Commit timestamp assigned by the store.
    pub created_at: DateTime<Utc>,
    /// User (or service) that caused the event.
    pub creator: String,
    /// Opaque JSON payload.
    pub payload: serde_json::Value,
}

impl StoredEvent {
    /// Decode the payload into a typed event.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialization`] if the payload does not match
    /// the target event type's schema.
    pub fn decode<E: Event + DeserializeOwned>(&self) -> Result<E, EventError> {
        E::from_payload(self.payload.clone())
    }
}

impl fmt::Display for StoredEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} #{} @{} ({})",
            self.event_type, self.sequence, self.position, self.aggregate.id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    enum TestEvent {
        Created { id: String, value: i32 },
        Updated { id: String, new_value: i32 },
    }

    impl Event for TestEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TestEvent::Created { .. } => "test.created",
                TestEvent::Updated { .. } => "test.updated",
            }
        }
    }

    #[test]
    fn event_type_returns_correct_identifier() {
        let event = TestEvent::Created {
            id: "t-1".to_string(),
            value: 42,
        };
        assert_eq!(event.event_type(), "test.created");
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if serialization fails
    fn payload_roundtrip() {
        let event = TestEvent::Updated {
            id: "t-1".to_string(),
            new_value: 100,
        };

        let payload = event.to_payload().expect("serialization should succeed");
        let decoded = TestEvent::from_payload(payload).expect("deserialization should succeed");

        assert_eq!(event, decoded);
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if serialization fails
    fn pending_event_from_event() {
        let event = TestEvent::Created {
            id: "t-1".to_string(),
            value: 7,
        };

        let pending =
            PendingEvent::from_event(&event, "user-1").expect("serialization should succeed");

        assert_eq!(pending.event_type, "test.created");
        assert_eq!(pending.creator, "user-1");
        assert!(pending.payload.get("Created").is_some());
    }

    #[test]
    fn from_payload_rejects_mismatched_schema() {
        let result = TestEvent::from_payload(serde_json::json!({"Unknown": {}}));
        assert!(result.is_err());
    }
}
