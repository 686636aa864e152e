//! Testing utilities for domainbus applications.
//!
//! Mocks for the two collaborator seams of a bus: [`MockHandler`] records
//! what it receives and can be told to fail, [`MockEventStore`] wraps an
//! in-memory store with call recording and failure injection. With the
//! `async` feature, [`ConcurrencyProbe`] measures how many handler calls run
//! at once and [`FailureCollector`] captures what a bus reports to its error
//! callback.

use crate::context::EventContext;
use crate::error::{HandlerError, HandlerResult, StoreError, StoreResult};
use crate::event::Event;
use crate::handler::{EventHandler, Interest};
use crate::store::{EventStore, InMemoryEventStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

#[cfg(feature = "async")]
use crate::async_event_bus::{DispatchFailure, ErrorCallback};
#[cfg(feature = "async")]
use std::sync::atomic::AtomicUsize;
#[cfg(feature = "async")]
use tokio::sync::{Notify, Semaphore};

/// A recorded call.
#[derive(Debug, Clone)]
pub struct SpyCall {
    /// Name of the method that was called.
    pub method_name: String,
    /// Arguments rendered as strings.
    pub arguments: Vec<String>,
    /// When the call happened.
    pub at: Instant,
}

/// Records method calls for later assertions.
///
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct EventSpy {
    calls: Arc<Mutex<Vec<SpyCall>>>,
}

impl EventSpy {
    /// Creates an empty spy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a call.
    pub fn record_call<S: Into<String>>(&self, method_name: S, arguments: Vec<String>) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SpyCall {
                method_name: method_name.into(),
                arguments,
                at: Instant::now(),
            });
    }

    /// Returns every recorded call in order.
    pub fn calls(&self) -> Vec<SpyCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns how often `method_name` was called.
    pub fn call_count(&self, method_name: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|call| call.method_name == method_name)
            .count()
    }

    /// Returns `true` if `method_name` was called at least once.
    pub fn was_called(&self, method_name: &str) -> bool {
        self.call_count(method_name) > 0
    }

    /// Forgets every recorded call.
    pub fn clear(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Panics unless `method_name` was called exactly `expected` times.
    pub fn assert_called_times(&self, method_name: &str, expected: usize) {
        let actual = self.call_count(method_name);
        assert_eq!(
            actual, expected,
            "expected {method_name} to be called {expected} times, was called {actual} times"
        );
    }

    /// Panics unless `method_name` was called exactly once.
    pub fn assert_called_once(&self, method_name: &str) {
        self.assert_called_times(method_name, 1);
    }

    /// Panics if `method_name` was called.
    pub fn assert_not_called(&self, method_name: &str) {
        self.assert_called_times(method_name, 0);
    }
}

/// Handler that records the events it receives.
///
/// # Examples
///
/// ```rust
/// use domainbus::testing::MockHandler;
/// use domainbus::{Event, EventBus, EventContext, Interest};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let bus = EventBus::new();
/// let handler = Arc::new(MockHandler::new(Interest::name("example.created")));
/// bus.subscribe(handler.clone());
///
/// let event = Event::new("example.created", "example-1", json!({}));
/// bus.publish(&EventContext::new(), event).await.expect("publish");
/// assert_eq!(handler.received_count(), 1);
/// # });
/// ```
#[derive(Debug)]
pub struct MockHandler {
    interest: Interest,
    name: &'static str,
    received: Mutex<Vec<Event>>,
    should_error: AtomicBool,
    delay: Mutex<Option<Duration>>,
    spy: EventSpy,
}

impl MockHandler {
    /// Creates a handler with the given interest.
    pub fn new(interest: Interest) -> Self {
        Self {
            interest,
            name: "mock-handler",
            received: Mutex::new(Vec::new()),
            should_error: AtomicBool::new(false),
            delay: Mutex::new(None),
            spy: EventSpy::new(),
        }
    }

    /// Sets the name reported in errors.
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Makes every call sleep for `delay` before recording the event.
    #[cfg(feature = "async")]
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
        self
    }

    /// Makes subsequent calls fail after recording the event.
    pub fn set_should_error(&self, should_error: bool) {
        self.should_error.store(should_error, Ordering::SeqCst);
    }

    /// Returns the events received so far, in order.
    pub fn received_events(&self) -> Vec<Event> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns how many events were received.
    pub fn received_count(&self) -> usize {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns the call spy.
    pub fn spy(&self) -> &EventSpy {
        &self.spy
    }

    /// Forgets every received event and call.
    pub fn clear(&self) {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.spy.clear();
    }
}

#[async_trait]
impl EventHandler for MockHandler {
    fn interested_in(&self, event_name: &str) -> bool {
        self.interest.matches(event_name)
    }

    async fn handle_event(&self, _ctx: &EventContext, event: &Event) -> HandlerResult<()> {
        self.spy
            .record_call("handle_event", vec![event.event_id().to_string()]);

        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        #[cfg(feature = "async")]
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        #[cfg(not(feature = "async"))]
        let _ = delay;

        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());

        if self.should_error.load(Ordering::SeqCst) {
            Err(HandlerError::failed(format!(
                "{} rejected {}",
                self.name,
                event.event_name()
            )))
        } else {
            Ok(())
        }
    }

    fn handler_name(&self) -> &'static str {
        self.name
    }
}

/// Event store with call recording and failure injection.
///
/// Successful calls are served by an [`InMemoryEventStore`].
#[derive(Debug, Default)]
pub struct MockEventStore {
    inner: InMemoryEventStore,
    spy: EventSpy,
    fail_save: AtomicBool,
    fail_load: AtomicBool,
    fail_mark_processed: AtomicBool,
}

impl MockEventStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-loaded with events.
    pub fn with_events(events: impl IntoIterator<Item = Event>) -> Self {
        Self {
            inner: InMemoryEventStore::with_events(events),
            ..Self::default()
        }
    }

    /// Makes `save_event` fail.
    pub fn set_fail_save(&self, fail: bool) {
        self.fail_save.store(fail, Ordering::SeqCst);
    }

    /// Makes `get_events` fail.
    pub fn set_fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    /// Makes `mark_processed` fail.
    pub fn set_fail_mark_processed(&self, fail: bool) {
        self.fail_mark_processed.store(fail, Ordering::SeqCst);
    }

    /// Returns the call spy. Method names are the trait method names.
    pub fn spy(&self) -> &EventSpy {
        &self.spy
    }

    /// Returns the backing store.
    pub fn inner(&self) -> &InMemoryEventStore {
        &self.inner
    }
}

fn injected(operation: &str) -> StoreError {
    StoreError::backend(format!("injected {operation} failure"))
}

#[async_trait]
impl EventStore for MockEventStore {
    async fn save_event(&self, event: &Event) -> StoreResult<()> {
        self.spy
            .record_call("save_event", vec![event.event_id().to_string()]);
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(injected("save"));
        }
        self.inner.save_event(event).await
    }

    async fn get_events(&self, event_type: &str, since: DateTime<Utc>) -> StoreResult<Vec<Event>> {
        self.spy
            .record_call("get_events", vec![event_type.to_string(), since.to_rfc3339()]);
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(injected("load"));
        }
        self.inner.get_events(event_type, since).await
    }

    async fn mark_processed(&self, event_id: Uuid) -> StoreResult<()> {
        self.spy
            .record_call("mark_processed", vec![event_id.to_string()]);
        if self.fail_mark_processed.load(Ordering::SeqCst) {
            return Err(injected("mark-processed"));
        }
        self.inner.mark_processed(event_id).await
    }
}

/// Handler that parks every call until released and tracks how many calls
/// are running at once.
///
/// # Examples
///
/// ```rust
/// use domainbus::testing::ConcurrencyProbe;
/// use domainbus::{AsyncEventBus, Event, EventContext, Interest};
/// use serde_json::json;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let bus = AsyncEventBus::builder().with_worker_count(2).build().expect("build");
/// let probe = Arc::new(ConcurrencyProbe::new(Interest::All));
/// bus.subscribe(probe.clone());
///
/// for _ in 0..4 {
///     let event = Event::new("example.created", "example-1", json!({}));
///     bus.publish(&EventContext::new(), event).await.expect("publish");
/// }
/// probe.wait_started(2).await;
/// probe.release(4);
/// bus.close(Duration::from_secs(5)).await.expect("close");
/// assert_eq!(probe.max_live(), 2);
/// # }
/// ```
#[cfg(feature = "async")]
#[derive(Debug)]
pub struct ConcurrencyProbe {
    interest: Interest,
    gate: Semaphore,
    progress: Notify,
    live: AtomicUsize,
    max_live: AtomicUsize,
    started: AtomicUsize,
    finished: AtomicUsize,
}

#[cfg(feature = "async")]
impl ConcurrencyProbe {
    /// Creates a probe with every call parked.
    pub fn new(interest: Interest) -> Self {
        Self {
            interest,
            gate: Semaphore::new(0),
            progress: Notify::new(),
            live: AtomicUsize::new(0),
            max_live: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        }
    }

    /// Lets `count` parked or future calls finish.
    pub fn release(&self, count: usize) {
        self.gate.add_permits(count);
    }

    /// Waits until at least `count` calls have started.
    pub async fn wait_started(&self, count: usize) {
        loop {
            let notified = self.progress.notified();
            if self.started() >= count {
                return;
            }
            notified.await;
        }
    }

    /// Calls currently running.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of calls seen running at once.
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    /// Calls started so far.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Calls finished so far.
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[cfg(feature = "async")]
#[async_trait]
impl EventHandler for ConcurrencyProbe {
    fn interested_in(&self, event_name: &str) -> bool {
        self.interest.matches(event_name)
    }

    async fn handle_event(&self, _ctx: &EventContext, _event: &Event) -> HandlerResult<()> {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
        self.started.fetch_add(1, Ordering::SeqCst);
        self.progress.notify_waiters();

        let acquired = self.gate.acquire().await;
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
        self.progress.notify_waiters();

        match acquired {
            Ok(permit) => {
                permit.forget();
                Ok(())
            }
            Err(_) => Err(HandlerError::Cancelled),
        }
    }

    fn handler_name(&self) -> &'static str {
        "concurrency-probe"
    }
}

/// Captures failures reported by an `AsyncEventBus`.
#[cfg(feature = "async")]
#[derive(Debug, Clone, Default)]
pub struct FailureCollector {
    failures: Arc<Mutex<Vec<String>>>,
}

#[cfg(feature = "async")]
impl FailureCollector {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an error callback that records into this collector.
    pub fn callback(&self) -> ErrorCallback {
        let failures = Arc::clone(&self.failures);
        Arc::new(move |failure: &DispatchFailure| {
            failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(failure.error.to_string());
        })
    }

    /// Rendered errors in the order they were reported.
    pub fn messages(&self) -> Vec<String> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of reported failures.
    pub fn len(&self) -> usize {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing was reported.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spy_records_calls() {
        let spy = EventSpy::new();
        spy.record_call("save_event", vec!["1".into()]);
        spy.record_call("save_event", vec!["2".into()]);
        spy.record_call("mark_processed", vec!["1".into()]);

        spy.assert_called_times("save_event", 2);
        spy.assert_called_once("mark_processed");
        spy.assert_not_called("get_events");
        assert_eq!(spy.calls()[1].arguments, vec!["2".to_string()]);

        spy.clear();
        assert!(!spy.was_called("save_event"));
    }

    #[tokio::test]
    async fn test_mock_handler_records_and_fails_on_demand() {
        let handler = MockHandler::new(Interest::namespace("example")).named("mock");
        let ctx = EventContext::new();
        let event = Event::new("example.created", "example-1", json!({}));

        assert!(handler.interested_in("example.deleted"));
        assert!(!handler.interested_in("invoice.paid"));
        handler.handle_event(&ctx, &event).await.expect("first call");

        handler.set_should_error(true);
        let error = handler.handle_event(&ctx, &event).await.unwrap_err();
        assert_eq!(error.to_string(), "mock rejected example.created");

        assert_eq!(handler.received_count(), 2);
        handler.spy().assert_called_times("handle_event", 2);
    }

    #[tokio::test]
    async fn test_mock_store_injects_failures() {
        let store = MockEventStore::new();
        let event = Event::new("example.created", "example-1", json!({}));

        store.save_event(&event).await.expect("save");
        store.set_fail_mark_processed(true);
        assert!(store.mark_processed(event.event_id()).await.is_err());
        store.set_fail_save(true);
        assert!(store.save_event(&event).await.is_err());
        store.set_fail_load(true);
        assert!(store
            .get_events("example.created", event.occurred_at())
            .await
            .is_err());

        assert_eq!(store.inner().len(), 1);
        store.spy().assert_called_times("save_event", 2);
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_probe_tracks_live_calls() {
        let probe = Arc::new(ConcurrencyProbe::new(Interest::All));
        let event = Event::new("example.created", "example-1", json!({}));

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let probe = Arc::clone(&probe);
                let event = event.clone();
                tokio::spawn(async move { probe.handle_event(&EventContext::new(), &event).await })
            })
            .collect();

        probe.wait_started(3).await;
        assert_eq!(probe.live(), 3);
        probe.release(3);
        for task in tasks {
            task.await.expect("join").expect("handler");
        }
        assert_eq!(probe.max_live(), 3);
        assert_eq!(probe.finished(), 3);
    }
}
