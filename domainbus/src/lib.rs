//! # domainbus - In-Process Domain Event Distribution
//!
//! domainbus carries domain events from the code that records them to the
//! handlers that react to them, inside one process. Producers publish
//! immutable [`Event`] records; handlers declare which event names they care
//! about and receive matching events either inline or on a bounded worker
//! pool.
//!
//! ## Features
//!
//! - **Synchronous bus**: [`EventBus`] runs interested handlers in
//!   subscription order before `publish` returns and stops at the first error
//! - **Asynchronous bus**: `AsyncEventBus` persists, queues and dispatches
//!   on a bounded pool, rejects publishes when the queue is full and shuts
//!   down gracefully with a timeout
//! - **Replay**: re-publish stored history through the normal publish path
//! - **Typed events**: `#[derive(EventKind)]` maps an enum to event names and
//!   payloads, decoded once at the handler boundary
//! - **Pluggable persistence**: any [`EventStore`] implementation
//! - **Metrics**: optional Prometheus counters (`metrics` feature)
//!
//! ## Quick Start
//!
//! ```rust
//! use domainbus::{from_fn, Event, EventBus, EventContext, Interest};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let bus = EventBus::new();
//!
//! bus.subscribe(Arc::new(from_fn(Interest::name("example.created"), |_ctx, event| async move {
//!     println!("example {} created", event.aggregate_id());
//!     Ok(())
//! })));
//!
//! let event = Event::new("example.created", "example-42", json!({ "title": "first" }));
//! bus.publish(&EventContext::new(), event)
//!     .await
//!     .expect("Failed to publish event");
//! # });
//! ```
//!
//! ## Cargo features
//!
//! - `async` (default): `AsyncEventBus` and the Tokio-based test helpers
//! - `metrics`: Prometheus metrics for `AsyncEventBus`

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Lets derive output name `::domainbus` from inside this crate.
extern crate self as domainbus;

// Re-export derive macros
pub use domainbus_derive::EventKind;

// Core modules
pub mod bus;
pub mod context;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod handler;
pub mod kind;
pub mod noop;
pub mod store;
pub mod testing;

mod registry;

// Feature-gated modules
#[cfg(feature = "async")]
pub mod async_event_bus;

#[cfg(feature = "metrics")]
pub mod metrics;

// Re-exports for convenience
pub use bus::Bus;
pub use context::EventContext;
pub use error::*;
pub use event::{validate_event_name, Event};
pub use event_bus::{EventBus, EventBusConfig};
pub use handler::{from_fn, EventHandler, FnHandler, HandlerId, Interest};
pub use kind::{EventKind, KindHandler, Typed};
pub use noop::NoopEventBus;
pub use store::{EventStore, InMemoryEventStore, NoopEventStore, StoredEvent};

#[cfg(feature = "async")]
pub use async_event_bus::{
    AsyncEventBus, AsyncEventBusBuilder, AsyncEventBusConfig, DispatchFailure, ErrorCallback,
};

#[cfg(feature = "metrics")]
pub use metrics::EventBusMetrics;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{EventBusError, EventBusResult, HandlerError, HandlerResult};
    pub use crate::{
        from_fn, Bus, Event, EventBus, EventContext, EventHandler, EventKind, EventStore,
        HandlerId, Interest, KindHandler, NoopEventBus, Typed,
    };

    #[cfg(feature = "async")]
    pub use crate::{AsyncEventBus, AsyncEventBusConfig, DispatchFailure, ErrorCallback};
}

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}

/// Version information for the domainbus library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
