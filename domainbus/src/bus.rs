//! The publishing interface shared by every bus.

use crate::context::EventContext;
use crate::error::EventBusResult;
use crate::event::Event;
use crate::handler::{EventHandler, HandlerId};
use async_trait::async_trait;
use std::sync::Arc;

/// Common interface of [`EventBus`](crate::EventBus),
/// [`NoopEventBus`](crate::NoopEventBus) and, with the `async` feature,
/// `AsyncEventBus`.
///
/// Producers usually hold an `Arc<dyn Bus>` so the delivery strategy can be
/// chosen when the application is wired together.
///
/// # Examples
///
/// ```rust
/// use domainbus::{Bus, Event, EventBus, EventContext, NoopEventBus};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let buses: Vec<Arc<dyn Bus>> = vec![Arc::new(EventBus::new()), Arc::new(NoopEventBus)];
/// for bus in buses {
///     let event = Event::new("example.created", "example-1", json!({}));
///     bus.publish(&EventContext::new(), event).await.expect("publish");
/// }
/// # });
/// ```
#[async_trait]
pub trait Bus: Send + Sync {
    /// Registers a handler and returns the id of this subscription.
    fn subscribe(&self, handler: Arc<dyn EventHandler>) -> HandlerId;

    /// Removes the first subscription of this handler allocation.
    ///
    /// Returns `false` when the handler is not subscribed.
    fn unsubscribe(&self, handler: &Arc<dyn EventHandler>) -> bool;

    /// Publishes an event.
    async fn publish(&self, ctx: &EventContext, event: Event) -> EventBusResult<()>;
}
