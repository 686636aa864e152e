//! The event record published through every bus.
//!
//! An [`Event`] describes something that already happened to a domain
//! entity. It is immutable once constructed: identity and timestamp are
//! assigned by the constructor and the bus and store only ever read it.

use crate::error::{EventValidationError, PayloadError};
use crate::kind::EventKind;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable record of a state change in the domain.
///
/// # Examples
///
/// ```rust
/// use domainbus::Event;
/// use serde_json::json;
///
/// let event = Event::new("example.created", "example-42", json!({ "title": "first" }));
///
/// assert_eq!(event.event_name(), "example.created");
/// assert_eq!(event.aggregate_id(), "example-42");
/// assert!(event.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: Uuid,
    name: String,
    aggregate_id: String,
    occurred_at: DateTime<Utc>,
    payload: serde_json::Value,
}

impl Event {
    /// Creates a new event with a fresh id, stamped with the current UTC time.
    pub fn new(
        name: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            aggregate_id: aggregate_id.into(),
            occurred_at: Utc::now(),
            payload,
        }
    }

    /// Creates an event from a typed event kind.
    ///
    /// The event name comes from the kind's variant and the payload is the
    /// variant's data encoded as JSON.
    pub fn from_kind<K: EventKind>(
        aggregate_id: impl Into<String>,
        kind: &K,
    ) -> Result<Self, PayloadError> {
        let payload = kind.encode_payload()?;
        Ok(Self::new(kind.event_name(), aggregate_id, payload))
    }

    /// Rebuilds an event that was previously persisted.
    ///
    /// Stores use this to hand back the exact record they saved, keeping the
    /// original id and timestamp.
    pub fn restore(
        id: Uuid,
        name: impl Into<String>,
        aggregate_id: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            aggregate_id: aggregate_id.into(),
            occurred_at,
            payload,
        }
    }

    /// Returns the globally unique id of this event.
    pub fn event_id(&self) -> Uuid {
        self.id
    }

    /// Returns the dot-namespaced event name, e.g. `example.created`.
    pub fn event_name(&self) -> &str {
        &self.name
    }

    /// Returns the id of the entity this event concerns.
    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    /// Returns when the event was created.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Returns the raw payload.
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Decodes the payload into a concrete type.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, PayloadError> {
        T::deserialize(&self.payload).map_err(|source| PayloadError::Decode {
            event_name: self.name.clone(),
            source,
        })
    }

    /// Checks that the event name is a well-formed dot-namespaced name.
    ///
    /// The name must be non-empty, must not contain whitespace and must not
    /// contain an empty segment (`"a..b"`, `".a"`, `"a."`).
    pub fn validate(&self) -> Result<(), EventValidationError> {
        validate_event_name(&self.name)
    }

    /// Returns a short description of this event for logging.
    pub fn log_description(&self) -> String {
        format!("{} ({}) for {}", self.name, self.id, self.aggregate_id)
    }
}

/// Validates a dot-namespaced event name.
pub fn validate_event_name(name: &str) -> Result<(), EventValidationError> {
    if name.is_empty() {
        return Err(EventValidationError::missing_field("name"));
    }
    if name.chars().any(char::is_whitespace) || name.split('.').any(str::is_empty) {
        return Err(EventValidationError::invalid_value("name", name));
    }
    Ok(())
}
