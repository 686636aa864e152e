//! Tagged event kinds.
//!
//! Instead of handlers inspecting the raw JSON payload of every event, an
//! application groups its events into an enum where each variant is one event
//! name and wraps that event's typed payload. The enum is decoded once, at the
//! handler boundary, and handlers `match` on it.
//!
//! # Examples
//!
//! ```rust
//! use domainbus::{Event, EventContext, EventKind, HandlerResult, KindHandler, Typed};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct ExampleCreated {
//!     title: String,
//! }
//!
//! #[derive(Debug, EventKind)]
//! #[event(namespace = "example")]
//! enum ExampleEvent {
//!     Created(ExampleCreated),
//!     Deleted,
//! }
//!
//! struct Indexer;
//!
//! #[async_trait::async_trait]
//! impl KindHandler<ExampleEvent> for Indexer {
//!     async fn handle_kind(
//!         &self,
//!         _ctx: &EventContext,
//!         event: &Event,
//!         kind: ExampleEvent,
//!     ) -> HandlerResult<()> {
//!         match kind {
//!             ExampleEvent::Created(created) => println!("index {} as {}", event.aggregate_id(), created.title),
//!             ExampleEvent::Deleted => println!("drop {}", event.aggregate_id()),
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let handler: Typed<ExampleEvent, _> = Typed::new(Indexer);
//! assert_eq!(ExampleEvent::NAMES, &["example.created", "example.deleted"]);
//! # let _ = handler;
//! ```

use crate::context::EventContext;
use crate::error::{HandlerResult, PayloadError};
use crate::event::Event;
use crate::handler::EventHandler;
use async_trait::async_trait;
use std::marker::PhantomData;

/// An enumerated set of event names with a typed payload per name.
///
/// Usually implemented with `#[derive(EventKind)]`.
pub trait EventKind: Sized + Send + Sync + 'static {
    /// Every event name this kind covers.
    const NAMES: &'static [&'static str];

    /// Returns the event name of this variant.
    fn event_name(&self) -> &'static str;

    /// Encodes the variant's payload as JSON.
    fn encode_payload(&self) -> Result<serde_json::Value, PayloadError>;

    /// Decodes an event into the matching variant.
    ///
    /// Returns [`PayloadError::UnknownKind`] when the event's name is not in
    /// [`NAMES`](Self::NAMES).
    fn decode(event: &Event) -> Result<Self, PayloadError>;

    /// Returns `true` if `event_name` is one of this kind's names.
    fn covers(event_name: &str) -> bool {
        Self::NAMES.contains(&event_name)
    }
}

/// A handler that receives events already decoded into an [`EventKind`].
#[async_trait]
pub trait KindHandler<K: EventKind>: Send + Sync + 'static {
    /// Handles one decoded event. `event` is the original record.
    async fn handle_kind(&self, ctx: &EventContext, event: &Event, kind: K) -> HandlerResult<()>;

    /// Returns the name of this handler for debugging and logging.
    fn handler_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Adapts a [`KindHandler`] into an [`EventHandler`].
///
/// The adapter is interested in exactly the kind's names and decodes the
/// payload before calling the inner handler. A payload that does not decode
/// becomes a [`HandlerError::Payload`](crate::HandlerError::Payload).
pub struct Typed<K, H> {
    handler: H,
    _kind: PhantomData<fn() -> K>,
}

impl<K, H> Typed<K, H>
where
    K: EventKind,
    H: KindHandler<K>,
{
    /// Wraps a typed handler.
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _kind: PhantomData,
        }
    }

    /// Returns the wrapped handler.
    pub fn inner(&self) -> &H {
        &self.handler
    }
}

#[async_trait]
impl<K, H> EventHandler for Typed<K, H>
where
    K: EventKind,
    H: KindHandler<K>,
{
    fn interested_in(&self, event_name: &str) -> bool {
        K::covers(event_name)
    }

    async fn handle_event(&self, ctx: &EventContext, event: &Event) -> HandlerResult<()> {
        let kind = K::decode(event)?;
        self.handler.handle_kind(ctx, event, kind).await
    }

    fn handler_name(&self) -> &'static str {
        self.handler.handler_name()
    }
}
