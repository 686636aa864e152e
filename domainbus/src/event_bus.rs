//! Synchronous event bus.
//!
//! [`EventBus`] delivers an event to its handlers inline: `publish` returns
//! only after every interested handler has run, or as soon as one of them
//! fails. Handlers run one after another in subscription order on the
//! publisher's task.

use crate::bus::Bus;
use crate::context::EventContext;
use crate::error::{EventBusError, EventBusResult};
use crate::event::Event;
use crate::handler::{EventHandler, HandlerId};
use crate::registry::HandlerRegistry;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Configuration options for the EventBus.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Whether to validate events before dispatch.
    pub validate_events: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            validate_events: true,
        }
    }
}

/// In-memory fan-out bus that runs handlers on the publisher's task.
///
/// A handler error stops dispatch for that event and is returned to the
/// publisher; handlers after the failing one are not called.
///
/// # Examples
///
/// ```rust
/// use domainbus::{from_fn, Event, EventBus, EventContext, Interest};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let bus = EventBus::new();
/// bus.subscribe(Arc::new(from_fn(Interest::name("example.created"), |_ctx, event| async move {
///     println!("created {}", event.aggregate_id());
///     Ok(())
/// })));
///
/// let event = Event::new("example.created", "example-1", json!({ "title": "first" }));
/// bus.publish(&EventContext::new(), event).await.expect("publish");
/// # });
/// ```
pub struct EventBus {
    config: EventBusConfig,
    handlers: HandlerRegistry,
}

impl EventBus {
    /// Creates a new EventBus with default configuration.
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Creates a new EventBus with the specified configuration.
    pub fn with_config(config: EventBusConfig) -> Self {
        Self {
            config,
            handlers: HandlerRegistry::new(),
        }
    }

    /// Registers a handler and returns the id of this subscription.
    ///
    /// Subscribing the same handler twice creates two subscriptions; it is
    /// then called twice per matching event.
    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        let name = handler.handler_name();
        let id = self.handlers.subscribe(handler);
        debug!(handler = name, handler_id = %id, "subscribed handler");
        id
    }

    /// Removes the first subscription of this handler allocation.
    pub fn unsubscribe(&self, handler: &Arc<dyn EventHandler>) -> bool {
        let removed = self.handlers.unsubscribe(handler);
        debug!(handler = handler.handler_name(), removed, "unsubscribed handler");
        removed
    }

    /// Removes a subscription by id.
    pub fn off(&self, id: HandlerId) -> bool {
        self.handlers.off(id)
    }

    /// Delivers `event` to every interested handler, in subscription order.
    ///
    /// `Ok(())` means every interested handler processed the event before
    /// this call returned.
    ///
    /// # Errors
    ///
    /// - [`EventBusError::Validation`] if validation is enabled and the event
    ///   is malformed. No handler is called.
    /// - [`EventBusError::Handler`] with the first handler error.
    pub async fn publish(&self, ctx: &EventContext, event: Event) -> EventBusResult<()> {
        if self.config.validate_events {
            event.validate()?;
        }

        let handlers = self.handlers.snapshot();
        let mut delivered = 0usize;
        for entry in handlers
            .iter()
            .filter(|entry| entry.handler.interested_in(event.event_name()))
        {
            if let Err(source) = entry.handler.handle_event(ctx, &event).await {
                let handler = entry.handler.handler_name();
                warn!(
                    event_id = %event.event_id(),
                    event_name = event.event_name(),
                    handler,
                    error = %source,
                    "handler failed, stopping dispatch"
                );
                return Err(EventBusError::handler(handler, source));
            }
            delivered += 1;
        }

        debug!(
            event_id = %event.event_id(),
            event_name = event.event_name(),
            delivered,
            "published event"
        );
        Ok(())
    }

    /// Returns the number of subscriptions.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Removes every subscription.
    pub fn clear(&self) {
        self.handlers.clear();
    }

    /// Returns the configuration of this bus.
    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for EventBus {
    fn subscribe(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        EventBus::subscribe(self, handler)
    }

    fn unsubscribe(&self, handler: &Arc<dyn EventHandler>) -> bool {
        EventBus::unsubscribe(self, handler)
    }

    async fn publish(&self, ctx: &EventContext, event: Event) -> EventBusResult<()> {
        EventBus::publish(self, ctx, event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EventValidationError, HandlerError};
    use crate::handler::{from_fn, Interest};
    use serde_json::json;
    use std::sync::Mutex;

    /// Handler that appends its label to a shared log and optionally fails.
    fn recording(
        log: &Arc<Mutex<Vec<&'static str>>>,
        label: &'static str,
        interest: Interest,
        fail: bool,
    ) -> Arc<dyn EventHandler> {
        let log = Arc::clone(log);
        Arc::new(
            from_fn(interest, move |_ctx, _event| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().expect("log lock").push(label);
                    if fail {
                        Err(HandlerError::failed(format!("{label} refused")))
                    } else {
                        Ok(())
                    }
                }
            })
            .named(label),
        )
    }

    fn created() -> Event {
        Event::new("example.created", "example-1", json!({}))
    }

    #[tokio::test]
    async fn test_publish_reaches_interested_handlers_in_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(recording(&log, "first", Interest::All, false));
        bus.subscribe(recording(&log, "deleted", Interest::name("example.deleted"), false));
        bus.subscribe(recording(&log, "second", Interest::namespace("example"), false));

        bus.publish(&EventContext::new(), created())
            .await
            .expect("publish");

        assert_eq!(*log.lock().expect("log lock"), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_first_failure_stops_dispatch() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(recording(&log, "first", Interest::All, false));
        bus.subscribe(recording(&log, "broken", Interest::All, true));
        bus.subscribe(recording(&log, "never", Interest::All, false));

        let error = bus
            .publish(&EventContext::new(), created())
            .await
            .unwrap_err();

        match error {
            EventBusError::Handler { handler, source } => {
                assert_eq!(handler, "broken");
                assert_eq!(source.to_string(), "broken refused");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(*log.lock().expect("log lock"), vec!["first", "broken"]);
    }

    #[tokio::test]
    async fn test_invalid_event_is_rejected_before_dispatch() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(recording(&log, "any", Interest::All, false));

        let error = bus
            .publish(&EventContext::new(), Event::new("", "example-1", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            EventBusError::Validation(EventValidationError::MissingField { .. })
        ));
        assert!(log.lock().expect("log lock").is_empty());
    }

    #[tokio::test]
    async fn test_validation_can_be_disabled() {
        let bus = EventBus::with_config(EventBusConfig {
            validate_events: false,
        });
        assert!(bus
            .publish(&EventContext::new(), Event::new("", "example-1", json!({})))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unsubscribe_and_off() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recording(&log, "a", Interest::All, false);
        let b_id = bus.subscribe(recording(&log, "b", Interest::All, false));
        bus.subscribe(Arc::clone(&a));

        assert!(bus.unsubscribe(&a));
        assert!(!bus.unsubscribe(&a));
        assert!(bus.off(b_id));
        assert_eq!(bus.handler_count(), 0);

        bus.publish(&EventContext::new(), created())
            .await
            .expect("publish");
        assert!(log.lock().expect("log lock").is_empty());
    }

    #[tokio::test]
    async fn test_publish_through_trait_object() {
        let bus: Arc<dyn Bus> = Arc::new(EventBus::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(recording(&log, "a", Interest::All, false));
        bus.publish(&EventContext::new(), created())
            .await
            .expect("publish");
        assert_eq!(log.lock().expect("log lock").len(), 1);
    }
}
