//! Asynchronous event bus.
//!
//! [`AsyncEventBus`] hands events to a bounded worker pool. Publishing saves
//! the event to the [`EventStore`] and puts it on a bounded queue without
//! waiting for capacity; a dispatcher task takes events off the queue, waits
//! for a free worker slot and spawns one worker per event. The worker runs
//! every interested handler and then marks the event processed.
//!
//! ```text
//! publish ──save──▶ store
//!    │
//!    └─try_send──▶ [ queue ] ──▶ dispatcher ──permit──▶ worker ──▶ handlers
//!                                                          └──▶ mark_processed
//! ```
//!
//! Errors that happen after `publish` returned go to the bus's
//! [`ErrorCallback`] instead of any caller.

use crate::bus::Bus;
use crate::context::EventContext;
use crate::error::{EventBusError, EventBusResult, StoreOperation};
use crate::event::Event;
use crate::handler::{EventHandler, HandlerId};
#[cfg(feature = "metrics")]
use crate::metrics::EventBusMetrics;
use crate::registry::HandlerRegistry;
use crate::store::{EventStore, NoopEventStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Deserialize;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{watch, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Configuration options for the AsyncEventBus.
///
/// Deserializes with defaults for missing fields, so it can be embedded in an
/// application config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AsyncEventBusConfig {
    /// Queue capacity. Publishing into a full queue fails immediately.
    pub queue_size: usize,

    /// Maximum number of events dispatched concurrently.
    pub worker_count: usize,

    /// Whether to validate events before saving them.
    pub validate_events: bool,
}

impl Default for AsyncEventBusConfig {
    fn default() -> Self {
        Self {
            queue_size: 1024,
            worker_count: 16,
            validate_events: true,
        }
    }
}

impl AsyncEventBusConfig {
    /// Checks that the queue and the worker pool are not empty.
    pub fn validate(&self) -> EventBusResult<()> {
        if self.queue_size == 0 {
            return Err(EventBusError::configuration("queue_size must be greater than 0"));
        }
        if self.worker_count == 0 {
            return Err(EventBusError::configuration(
                "worker_count must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// A failure that happened after `publish` returned.
#[derive(Debug)]
pub struct DispatchFailure {
    /// Id of the event being dispatched.
    pub event_id: Uuid,
    /// Name of the event being dispatched.
    pub event_name: String,
    /// What went wrong: a handler error, a handler panic or a failed
    /// `mark_processed`.
    pub error: EventBusError,
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.event_name, self.event_id, self.error)
    }
}

/// Sink for failures no caller can observe.
pub type ErrorCallback = Arc<dyn Fn(&DispatchFailure) + Send + Sync>;

fn log_failure(failure: &DispatchFailure) {
    error!(
        event_id = %failure.event_id,
        event_name = %failure.event_name,
        error = %failure.error,
        "event dispatch failed"
    );
}

/// One accepted publish waiting for a worker.
struct Dispatch {
    ctx: EventContext,
    event: Event,
}

/// State shared by the bus handle, the dispatcher and the workers.
struct Shared {
    config: AsyncEventBusConfig,
    handlers: HandlerRegistry,
    store: Arc<dyn EventStore>,
    on_error: ErrorCallback,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
    in_flight: AtomicUsize,
    #[cfg(feature = "metrics")]
    metrics: Option<EventBusMetrics>,
}

impl Shared {
    fn report(&self, event: &Event, error: EventBusError) {
        (self.on_error)(&DispatchFailure {
            event_id: event.event_id(),
            event_name: event.event_name().to_string(),
            error,
        });
    }

    fn signal(&self, signal: Signal<'_>) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record(signal);
        }
        #[cfg(not(feature = "metrics"))]
        let _ = signal;
    }
}

/// Something worth counting happened.
#[cfg_attr(not(feature = "metrics"), allow(dead_code))]
pub(crate) enum Signal<'a> {
    Published,
    Rejected(&'a EventBusError),
    Processed,
    HandlerFailed,
    WorkerStarted,
    WorkerFinished,
}

/// Event bus that dispatches on a bounded pool of Tokio tasks.
///
/// Must be built inside a Tokio runtime. The owner shuts it down with
/// [`close`](Self::close); a bus dropped without `close` still processes
/// every event it accepted, in the background.
///
/// # Examples
///
/// ```rust
/// use domainbus::{from_fn, AsyncEventBus, Event, EventContext, Interest};
/// use serde_json::json;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), domainbus::EventBusError> {
///     let bus = AsyncEventBus::builder()
///         .with_queue_size(64)
///         .with_worker_count(4)
///         .build()?;
///
///     bus.subscribe(Arc::new(from_fn(Interest::namespace("example"), |_ctx, event| async move {
///         println!("handled {}", event.event_name());
///         Ok(())
///     })));
///
///     let event = Event::new("example.created", "example-1", json!({}));
///     bus.publish(&EventContext::new(), event).await?;
///
///     bus.close(Duration::from_secs(5)).await
/// }
/// ```
pub struct AsyncEventBus {
    shared: Arc<Shared>,
    queue: mpsc::Sender<Dispatch>,
    quit: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncEventBus {
    /// Creates a bus with default configuration.
    pub fn new() -> EventBusResult<Self> {
        Self::builder().build()
    }

    /// Creates a bus with the given configuration, a no-op store and the
    /// logging error callback.
    pub fn with_config(config: AsyncEventBusConfig) -> EventBusResult<Self> {
        Self::builder().with_config(config).build()
    }

    /// Returns a builder for configuring a bus.
    pub fn builder() -> AsyncEventBusBuilder {
        AsyncEventBusBuilder::new()
    }

    /// Registers a handler and returns the id of this subscription.
    ///
    /// Safe while events are in flight; workers already running keep the
    /// handler list they started with.
    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        let name = handler.handler_name();
        let id = self.shared.handlers.subscribe(handler);
        debug!(handler = name, handler_id = %id, "subscribed handler");
        id
    }

    /// Removes the first subscription of this handler allocation.
    pub fn unsubscribe(&self, handler: &Arc<dyn EventHandler>) -> bool {
        let removed = self.shared.handlers.unsubscribe(handler);
        debug!(handler = handler.handler_name(), removed, "unsubscribed handler");
        removed
    }

    /// Removes a subscription by id.
    pub fn off(&self, id: HandlerId) -> bool {
        self.shared.handlers.off(id)
    }

    /// Saves `event` and queues it for dispatch.
    ///
    /// Never waits for queue capacity; the only suspension point is the
    /// store's `save_event`. `ctx` is handed to every handler that receives
    /// the event, so cancelling it reaches handlers still in flight.
    ///
    /// # Errors
    ///
    /// - [`EventBusError::ShuttingDown`] once [`close`](Self::close) was called.
    /// - [`EventBusError::Validation`] for a malformed event.
    /// - [`EventBusError::Persistence`] if the store refused the event. The
    ///   event is not queued.
    /// - [`EventBusError::QueueFull`] if the queue has no free slot. The event
    ///   stays saved but is not queued.
    pub async fn publish(&self, ctx: &EventContext, event: Event) -> EventBusResult<()> {
        if self.is_closed() {
            return Err(self.reject(&event, EventBusError::ShuttingDown));
        }
        if self.shared.config.validate_events {
            if let Err(invalid) = event.validate() {
                return Err(self.reject(&event, invalid.into()));
            }
        }
        if let Err(source) = self.shared.store.save_event(&event).await {
            return Err(self.reject(
                &event,
                EventBusError::persistence(StoreOperation::Save, source),
            ));
        }

        let event_id = event.event_id();
        let dispatch = Dispatch {
            ctx: ctx.clone(),
            event,
        };
        match self.queue.try_send(dispatch) {
            Ok(()) => {
                self.shared.signal(Signal::Published);
                debug!(%event_id, "queued event");
                Ok(())
            }
            Err(TrySendError::Full(dispatch)) => Err(self.reject(
                &dispatch.event,
                EventBusError::QueueFull {
                    capacity: self.shared.config.queue_size,
                },
            )),
            Err(TrySendError::Closed(dispatch)) => {
                Err(self.reject(&dispatch.event, EventBusError::ShuttingDown))
            }
        }
    }

    fn reject(&self, event: &Event, error: EventBusError) -> EventBusError {
        self.shared.signal(Signal::Rejected(&error));
        warn!(
            event_id = %event.event_id(),
            event_name = event.event_name(),
            error = %error,
            "publish rejected"
        );
        error
    }

    /// Re-publishes stored events named `event_type` that occurred at or
    /// after `since`, oldest first, and returns how many were re-published.
    ///
    /// Each event goes through [`publish`](Self::publish), so it is saved
    /// again and may be rejected by backpressure like any other publish.
    /// Handlers must tolerate seeing an event twice.
    ///
    /// # Errors
    ///
    /// - [`EventBusError::Persistence`] if the store cannot list the events.
    /// - [`EventBusError::Replay`] with the first publish failure. Events
    ///   before it stay published; events after it are not attempted.
    pub async fn replay_events(
        &self,
        ctx: &EventContext,
        event_type: &str,
        since: DateTime<Utc>,
    ) -> EventBusResult<usize> {
        let events = self
            .shared
            .store
            .get_events(event_type, since)
            .await
            .map_err(|source| EventBusError::persistence(StoreOperation::Load, source))?;
        let total = events.len();
        info!(event_name = event_type, %since, total, "replaying events");

        for (replayed, event) in events.into_iter().enumerate() {
            if let Err(source) = self.publish(ctx, event).await {
                warn!(event_name = event_type, replayed, total, "replay stopped");
                return Err(EventBusError::Replay {
                    replayed,
                    total,
                    source: Box::new(source),
                });
            }
        }
        Ok(total)
    }

    /// Stops accepting events and waits up to `timeout` for the queue to
    /// drain and every worker to finish.
    ///
    /// Events accepted before the call are still dispatched. Running handlers
    /// are never interrupted: on timeout they keep going in the background and
    /// a later `close` can wait for them again. Closing an already closed bus
    /// returns `Ok(())`.
    ///
    /// # Errors
    ///
    /// [`EventBusError::Timeout`] if dispatch did not finish in time.
    pub async fn close(&self, timeout: Duration) -> EventBusResult<()> {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            info!(queued = self.queued(), in_flight = self.in_flight(), "closing event bus");
        }
        self.quit.send_replace(true);

        // Waiting for the lock counts against the deadline: another close may
        // be holding it while it waits for the same dispatcher.
        let outcome = tokio::time::timeout(timeout, async {
            let mut dispatcher = self.dispatcher.lock().await;
            let handle = dispatcher.as_mut()?;
            let joined = handle.await;
            *dispatcher = None;
            Some(joined)
        })
        .await;
        match outcome {
            Ok(None) => Ok(()),
            Ok(Some(joined)) => {
                if let Err(join_error) = joined {
                    report_join_error("dispatcher", join_error);
                }
                info!("event bus closed");
                Ok(())
            }
            Err(_) => {
                warn!(
                    ?timeout,
                    queued = self.queued(),
                    in_flight = self.in_flight(),
                    "event bus did not drain in time"
                );
                Err(EventBusError::timeout(timeout))
            }
        }
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Events accepted but not yet picked up by the dispatcher.
    pub fn queued(&self) -> usize {
        self.queue.max_capacity() - self.queue.capacity()
    }

    /// Workers currently running handlers.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Returns the number of subscriptions.
    pub fn handler_count(&self) -> usize {
        self.shared.handlers.len()
    }

    /// Returns the configuration of this bus.
    pub fn config(&self) -> &AsyncEventBusConfig {
        &self.shared.config
    }
}

impl fmt::Debug for AsyncEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncEventBus")
            .field("config", &self.shared.config)
            .field("handlers", &self.handler_count())
            .field("queued", &self.queued())
            .field("in_flight", &self.in_flight())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl Bus for AsyncEventBus {
    fn subscribe(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        AsyncEventBus::subscribe(self, handler)
    }

    fn unsubscribe(&self, handler: &Arc<dyn EventHandler>) -> bool {
        AsyncEventBus::unsubscribe(self, handler)
    }

    async fn publish(&self, ctx: &EventContext, event: Event) -> EventBusResult<()> {
        AsyncEventBus::publish(self, ctx, event).await
    }
}

/// Dispatcher loop: one task per bus.
///
/// Runs until quit is signalled or every sender is gone, then closes the
/// queue, dispatches what was already accepted and waits for all workers.
async fn run_dispatcher(
    shared: Arc<Shared>,
    mut queue: mpsc::Receiver<Dispatch>,
    mut quit: watch::Receiver<bool>,
) {
    let mut workers = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = quit.changed() => break,
            Some(joined) = workers.join_next(), if !workers.is_empty() => {
                if let Err(join_error) = joined {
                    report_join_error("worker", join_error);
                }
            }
            next = queue.recv() => match next {
                Some(dispatch) => spawn_worker(&shared, &mut workers, dispatch).await,
                None => break,
            },
        }
    }

    queue.close();
    let mut drained = 0usize;
    while let Some(dispatch) = queue.recv().await {
        spawn_worker(&shared, &mut workers, dispatch).await;
        drained += 1;
    }
    debug!(drained, "dispatcher drained queue");

    while let Some(joined) = workers.join_next().await {
        if let Err(join_error) = joined {
            report_join_error("worker", join_error);
        }
    }
    debug!("dispatcher stopped");
}

/// Waits for a worker slot, then spawns the worker that owns it.
async fn spawn_worker(shared: &Arc<Shared>, workers: &mut JoinSet<()>, dispatch: Dispatch) {
    let permit = match Arc::clone(&shared.permits).acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            // The semaphore is never closed while the dispatcher runs.
            error!(event_id = %dispatch.event.event_id(), "worker pool closed, event dropped");
            return;
        }
    };
    workers.spawn(process(Arc::clone(shared), dispatch, permit));
}

/// Counts a running worker until dropped.
struct InFlight<'a>(&'a Shared);

impl<'a> InFlight<'a> {
    fn enter(shared: &'a Shared) -> Self {
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        shared.signal(Signal::WorkerStarted);
        Self(shared)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.0.signal(Signal::WorkerFinished);
    }
}

/// Runs every interested handler for one event, then marks it processed.
///
/// A failing or panicking handler is reported and the next handler still
/// runs. The permit is released when this returns.
async fn process(shared: Arc<Shared>, dispatch: Dispatch, _permit: OwnedSemaphorePermit) {
    let _in_flight = InFlight::enter(&shared);
    let Dispatch { ctx, event } = dispatch;

    let handlers = shared.handlers.snapshot();
    for entry in handlers.iter() {
        let handler = entry.handler.handler_name();
        // The interest check runs under the same guard as the handler: a
        // panic in either is reported for this handler only.
        let outcome = AssertUnwindSafe(async {
            if entry.handler.interested_in(event.event_name()) {
                entry.handler.handle_event(&ctx, &event).await
            } else {
                Ok(())
            }
        })
        .catch_unwind()
        .await;
        let failure = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(source)) => EventBusError::handler(handler, source),
            Err(panic) => EventBusError::HandlerPanicked {
                handler: handler.to_string(),
                message: panic_message(panic.as_ref()),
            },
        };
        shared.signal(Signal::HandlerFailed);
        shared.report(&event, failure);
    }

    if let Err(source) = shared.store.mark_processed(event.event_id()).await {
        shared.report(
            &event,
            EventBusError::persistence(StoreOperation::MarkProcessed, source),
        );
    }
    shared.signal(Signal::Processed);
    debug!(
        event_id = %event.event_id(),
        event_name = event.event_name(),
        "processed event"
    );
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn report_join_error(task: &'static str, join_error: JoinError) {
    if join_error.is_panic() {
        error!(task, error = %join_error, "dispatch task panicked");
    } else {
        debug!(task, error = %join_error, "dispatch task cancelled");
    }
}

/// Builder for creating customized AsyncEventBus instances.
///
/// # Examples
///
/// ```rust
/// use domainbus::{AsyncEventBus, DispatchFailure, InMemoryEventStore};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let bus = AsyncEventBus::builder()
///     .with_queue_size(256)
///     .with_worker_count(8)
///     .with_event_store(Arc::new(InMemoryEventStore::new()))
///     .with_error_callback(Arc::new(|failure: &DispatchFailure| eprintln!("dispatch failed: {failure}")))
///     .build()
///     .expect("valid configuration");
/// assert_eq!(bus.config().worker_count, 8);
/// # });
/// ```
pub struct AsyncEventBusBuilder {
    config: AsyncEventBusConfig,
    store: Option<Arc<dyn EventStore>>,
    on_error: Option<ErrorCallback>,
    #[cfg(feature = "metrics")]
    metrics: Option<EventBusMetrics>,
}

impl AsyncEventBusBuilder {
    /// Creates a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: AsyncEventBusConfig::default(),
            store: None,
            on_error: None,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: AsyncEventBusConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the queue capacity.
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.config.queue_size = queue_size;
        self
    }

    /// Sets the maximum number of concurrently dispatched events.
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.config.worker_count = worker_count;
        self
    }

    /// Enables or disables event validation.
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.config.validate_events = validate;
        self
    }

    /// Sets the event store. Defaults to [`NoopEventStore`].
    pub fn with_event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the sink for failures that happen after `publish` returned.
    /// Defaults to logging them at `error` level.
    pub fn with_error_callback(mut self, on_error: ErrorCallback) -> Self {
        self.on_error = Some(on_error);
        self
    }

    /// Records Prometheus metrics for this bus.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: EventBusMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validates the configuration and starts the dispatcher.
    ///
    /// # Errors
    ///
    /// [`EventBusError::ConfigurationError`] for a zero queue size or worker
    /// count, or when called outside a Tokio runtime.
    pub fn build(self) -> EventBusResult<AsyncEventBus> {
        self.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            EventBusError::configuration("AsyncEventBus must be built inside a Tokio runtime")
        })?;

        let shared = Arc::new(Shared {
            permits: Arc::new(Semaphore::new(self.config.worker_count)),
            handlers: HandlerRegistry::new(),
            store: self.store.unwrap_or_else(|| Arc::new(NoopEventStore)),
            on_error: self.on_error.unwrap_or_else(|| Arc::new(log_failure)),
            closed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            #[cfg(feature = "metrics")]
            metrics: self.metrics,
            config: self.config,
        });

        let (queue, receiver) = mpsc::channel(shared.config.queue_size);
        let (quit, quit_receiver) = watch::channel(false);
        let dispatcher = runtime.spawn(run_dispatcher(Arc::clone(&shared), receiver, quit_receiver));

        debug!(
            queue_size = shared.config.queue_size,
            worker_count = shared.config.worker_count,
            "started event bus"
        );
        Ok(AsyncEventBus {
            shared,
            queue,
            quit,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }
}

impl Default for AsyncEventBusBuilder {
    fn default() -> Self {
        Self::new()
    }
}
