//! Error types for domainbus.
//!
//! This module defines the errors that can surface from event construction,
//! handler execution, store access, and bus operations.
//!
//! Errors a publisher can act on synchronously (invalid event, failed save,
//! full queue, closed bus) come back from `publish` as [`EventBusError`].
//! Failures that happen after the asynchronous bus has taken the event are
//! reported through its error callback instead.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// A handler returned an error while processing an event.
    #[error("Handler {handler} failed: {source}")]
    Handler {
        /// Name of the failing handler.
        handler: String,
        /// The error returned by the handler.
        #[source]
        source: HandlerError,
    },

    /// A handler panicked while processing an event.
    #[error("Handler {handler} panicked: {message}")]
    HandlerPanicked {
        /// Name of the panicking handler.
        handler: String,
        /// The panic payload, when it was a string.
        message: String,
    },

    /// The event store rejected an operation.
    #[error("Event store {operation} failed: {source}")]
    Persistence {
        /// Which store operation failed.
        operation: StoreOperation,
        /// The error returned by the store.
        #[source]
        source: StoreError,
    },

    /// The event queue has no free slot.
    #[error("Event queue is full (capacity {capacity})")]
    QueueFull {
        /// The configured queue capacity.
        capacity: usize,
    },

    /// The event bus is shutting down and cannot accept new events.
    #[error("Bus is shutting down")]
    ShuttingDown,

    /// The operation timed out.
    #[error("Operation timed out after {duration:?}")]
    Timeout {
        /// The timeout duration.
        duration: Duration,
    },

    /// Event validation failed.
    #[error("Event validation failed: {0}")]
    Validation(#[from] EventValidationError),

    /// Configuration error occurred.
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// The configuration error message.
        message: String,
    },

    /// A replay stopped before every stored event was re-published.
    #[error("Replay stopped after {replayed} of {total} events: {source}")]
    Replay {
        /// Events re-published before the failure.
        replayed: usize,
        /// Events returned by the store.
        total: usize,
        /// The publish error that stopped the replay.
        #[source]
        source: Box<EventBusError>,
    },
}

/// The event store operation an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    /// `EventStore::save_event`.
    Save,
    /// `EventStore::get_events`.
    Load,
    /// `EventStore::mark_processed`.
    MarkProcessed,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreOperation::Save => f.write_str("save"),
            StoreOperation::Load => f.write_str("load"),
            StoreOperation::MarkProcessed => f.write_str("mark-processed"),
        }
    }
}

/// Errors returned by event handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Handler failed with a message.
    #[error("{message}")]
    Failed {
        /// Description of the failure.
        message: String,
    },

    /// Handler failed with a custom error.
    #[error("Handler failed with custom error: {0}")]
    Custom(Box<dyn std::error::Error + Send + Sync>),

    /// The event payload could not be decoded for this handler.
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// Handler observed a cancelled context and stopped.
    #[error("Handler execution cancelled")]
    Cancelled,
}

/// Errors reported by an [`EventStore`](crate::store::EventStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend failed.
    #[error("Backend error: {message}")]
    Backend {
        /// Description of the backend failure.
        message: String,
    },

    /// Store failed with a custom error.
    #[error(transparent)]
    Custom(Box<dyn std::error::Error + Send + Sync>),
}

/// Errors raised while encoding or decoding typed event payloads.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// A typed payload could not be turned into JSON.
    #[error("Failed to encode payload for {event_name}: {source}")]
    Encode {
        /// The event name being encoded.
        event_name: String,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// A JSON payload did not match the expected type.
    #[error("Failed to decode payload of {event_name}: {source}")]
    Decode {
        /// The event name being decoded.
        event_name: String,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// No variant of the event kind is registered under this name.
    #[error("Unknown event kind: {event_name}")]
    UnknownKind {
        /// The event name that did not match.
        event_name: String,
    },
}

/// Errors that can occur during event validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventValidationError {
    /// A required field is missing from the event.
    #[error("Required field missing: {field}")]
    MissingField {
        /// The name of the missing field.
        field: String,
    },

    /// A field has an invalid value.
    #[error("Invalid field value: {field} = {value}")]
    InvalidValue {
        /// The name of the field with invalid value.
        field: String,
        /// The invalid value.
        value: String,
    },
}

/// Convenience type alias for EventBus operation results.
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Convenience type alias for handler operation results.
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Convenience type alias for store operation results.
pub type StoreResult<T> = Result<T, StoreError>;

impl EventBusError {
    /// Creates a new configuration error.
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// Creates a new timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Wraps a handler error with the handler's name.
    pub fn handler<S: Into<String>>(handler: S, source: HandlerError) -> Self {
        Self::Handler {
            handler: handler.into(),
            source,
        }
    }

    /// Wraps a store error with the operation that produced it.
    pub fn persistence(operation: StoreOperation, source: StoreError) -> Self {
        Self::Persistence { operation, source }
    }

    /// Returns `true` for backpressure rejections.
    pub fn is_queue_full(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }

    /// Returns the handler error carried by this error, if any.
    pub fn handler_error(&self) -> Option<&HandlerError> {
        match self {
            Self::Handler { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl HandlerError {
    /// Creates a failure from a message.
    pub fn failed<S: Into<String>>(message: S) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Creates a new custom error from any error type.
    pub fn custom<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Self::Custom(Box::new(error))
    }
}

impl StoreError {
    /// Creates a backend error from a message.
    pub fn backend<S: Into<String>>(message: S) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates a new custom error from any error type.
    pub fn custom<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Self::Custom(Box::new(error))
    }
}

impl EventValidationError {
    /// Creates a new missing field error.
    pub fn missing_field<S: Into<String>>(field: S) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates a new invalid value error.
    pub fn invalid_value<F: Into<String>, V: Into<String>>(field: F, value: V) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let error = EventBusError::configuration("queue_size must be greater than zero");
        assert_eq!(
            error.to_string(),
            "Configuration error: queue_size must be greater than zero"
        );

        let error = EventBusError::QueueFull { capacity: 8 };
        assert_eq!(error.to_string(), "Event queue is full (capacity 8)");

        let error = EventValidationError::missing_field("name");
        assert_eq!(error.to_string(), "Required field missing: name");

        let error = EventBusError::persistence(
            StoreOperation::MarkProcessed,
            StoreError::backend("connection reset"),
        );
        assert_eq!(
            error.to_string(),
            "Event store mark-processed failed: Backend error: connection reset"
        );
    }

    #[test]
    fn test_handler_error_is_source() {
        let error = EventBusError::handler("audit", HandlerError::failed("disk full"));
        assert_eq!(error.to_string(), "Handler audit failed: disk full");
        assert_eq!(
            error.source().map(ToString::to_string).as_deref(),
            Some("disk full")
        );
        assert!(matches!(
            error.handler_error(),
            Some(HandlerError::Failed { message }) if message == "disk full"
        ));
    }

    #[test]
    fn test_validation_conversion() {
        let bus_error: EventBusError = EventValidationError::invalid_value("name", "a..b").into();
        match bus_error {
            EventBusError::Validation(EventValidationError::InvalidValue { field, value }) => {
                assert_eq!(field, "name");
                assert_eq!(value, "a..b");
            }
            other => panic!("Expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_queue_full_predicate() {
        assert!(EventBusError::QueueFull { capacity: 1 }.is_queue_full());
        assert!(!EventBusError::ShuttingDown.is_queue_full());
    }
}
