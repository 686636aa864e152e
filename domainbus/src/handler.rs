//! Event handler contract.
//!
//! A handler declares which event names it cares about and processes the
//! events it receives. Every bus in this crate drives the same trait.

use crate::context::EventContext;
use crate::error::HandlerResult;
use crate::event::Event;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a subscription.
///
/// Every call to `subscribe` returns a new id, even when the same handler is
/// subscribed twice, so one subscription can be removed without touching the
/// other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Creates a new unique handler ID.
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric value of this handler ID.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandlerId({})", self.0)
    }
}

/// Trait implemented by event consumers.
///
/// `interested_in` is called for every subscribed handler on every publish,
/// possibly from several worker tasks at once. It must be cheap and free of
/// side effects. `handle_event` may be called concurrently for different
/// events; the buses make no ordering promise between independently
/// dispatched events.
///
/// # Examples
///
/// ```rust
/// use domainbus::{Event, EventContext, EventHandler, HandlerResult};
///
/// struct AuditLog;
///
/// #[async_trait::async_trait]
/// impl EventHandler for AuditLog {
///     fn interested_in(&self, event_name: &str) -> bool {
///         event_name.starts_with("example.")
///     }
///
///     async fn handle_event(&self, _ctx: &EventContext, event: &Event) -> HandlerResult<()> {
///         println!("audit: {}", event.log_description());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Returns `true` if this handler wants events named `event_name`.
    fn interested_in(&self, event_name: &str) -> bool;

    /// Handles one event.
    async fn handle_event(&self, ctx: &EventContext, event: &Event) -> HandlerResult<()>;

    /// Returns the name of this handler for debugging and logging.
    ///
    /// The default implementation uses the type name.
    fn handler_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Declarative interest in event names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interest {
    /// Every event.
    All,
    /// Events whose name is one of the listed names.
    Names(Vec<String>),
    /// Events in a dot namespace: `"example"` covers `example` and
    /// `example.created`, but not `examples.created`.
    Namespace(String),
}

impl Interest {
    /// Interest in a fixed list of names.
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Names(names.into_iter().map(Into::into).collect())
    }

    /// Interest in a single name.
    pub fn name(name: impl Into<String>) -> Self {
        Self::Names(vec![name.into()])
    }

    /// Interest in a dot namespace.
    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self::Namespace(namespace.into())
    }

    /// Returns `true` if `event_name` falls under this interest.
    pub fn matches(&self, event_name: &str) -> bool {
        match self {
            Interest::All => true,
            Interest::Names(names) => names.iter().any(|name| name == event_name),
            Interest::Namespace(namespace) => event_name
                .strip_prefix(namespace.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('.')),
        }
    }
}

/// Handler built from an [`Interest`] and an async closure.
///
/// The closure receives owned clones of the context and event so the returned
/// future can be `'static`.
pub struct FnHandler<F> {
    interest: Interest,
    name: &'static str,
    f: F,
}

impl<F> FnHandler<F> {
    /// Sets the name reported in logs and error reports.
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Returns the interest this handler was built with.
    pub fn interest(&self) -> &Interest {
        &self.interest
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler")
            .field("interest", &self.interest)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Builds a handler from an interest and an async closure.
///
/// # Examples
///
/// ```rust
/// use domainbus::{from_fn, Interest};
///
/// let handler = from_fn(Interest::name("example.created"), |_ctx, event| async move {
///     println!("created {}", event.aggregate_id());
///     Ok(())
/// })
/// .named("print-created");
/// ```
pub fn from_fn<F, Fut>(interest: Interest, f: F) -> FnHandler<F>
where
    F: Fn(EventContext, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<()>> + Send + 'static,
{
    FnHandler {
        interest,
        name: "fn-handler",
        f,
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(EventContext, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<()>> + Send + 'static,
{
    fn interested_in(&self, event_name: &str) -> bool {
        self.interest.matches(event_name)
    }

    async fn handle_event(&self, ctx: &EventContext, event: &Event) -> HandlerResult<()> {
        (self.f)(ctx.clone(), event.clone()).await
    }

    fn handler_name(&self) -> &'static str {
        self.name
    }
}
