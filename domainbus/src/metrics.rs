//! Prometheus metrics for the asynchronous bus.
//!
//! Metrics are registered into a caller-supplied [`Registry`] so several buses
//! in one process can be told apart by registry (or by a prefix applied by the
//! registry itself).

use crate::async_event_bus::Signal;
use crate::error::EventBusError;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Reason label values for `domainbus_events_rejected_total`.
mod reason {
    pub(super) const SHUTTING_DOWN: &str = "shutting_down";
    pub(super) const INVALID: &str = "invalid";
    pub(super) const PERSISTENCE: &str = "persistence";
    pub(super) const QUEUE_FULL: &str = "queue_full";
}

fn reject_reason(error: &EventBusError) -> &'static str {
    match error {
        EventBusError::ShuttingDown => reason::SHUTTING_DOWN,
        EventBusError::Validation(_) => reason::INVALID,
        EventBusError::QueueFull { .. } => reason::QUEUE_FULL,
        _ => reason::PERSISTENCE,
    }
}

/// Counters and gauges updated by `AsyncEventBus`.
///
/// Cloning is cheap; clones update the same series.
///
/// # Examples
///
/// ```rust
/// use domainbus::EventBusMetrics;
/// use prometheus::Registry;
///
/// let registry = Registry::new();
/// let metrics = EventBusMetrics::new(&registry).expect("register metrics");
/// assert_eq!(metrics.events_published().get(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct EventBusMetrics {
    events_published: IntCounter,
    events_rejected: IntCounterVec,
    events_processed: IntCounter,
    handler_failures: IntCounter,
    workers_in_flight: IntGauge,
}

impl EventBusMetrics {
    /// Creates the metrics and registers them in `registry`.
    ///
    /// # Errors
    ///
    /// Fails if a metric with the same name is already registered.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let events_published = IntCounter::with_opts(Opts::new(
            "domainbus_events_published_total",
            "Events accepted into the dispatch queue",
        ))?;
        let events_rejected = IntCounterVec::new(
            Opts::new(
                "domainbus_events_rejected_total",
                "Events refused by publish, by reason",
            ),
            &["reason"],
        )?;
        let events_processed = IntCounter::with_opts(Opts::new(
            "domainbus_events_processed_total",
            "Events whose handlers have all run",
        ))?;
        let handler_failures = IntCounter::with_opts(Opts::new(
            "domainbus_handler_failures_total",
            "Handler errors and panics reported to the error callback",
        ))?;
        let workers_in_flight = IntGauge::with_opts(Opts::new(
            "domainbus_workers_in_flight",
            "Per-event workers currently running",
        ))?;

        registry.register(Box::new(events_published.clone()))?;
        registry.register(Box::new(events_rejected.clone()))?;
        registry.register(Box::new(events_processed.clone()))?;
        registry.register(Box::new(handler_failures.clone()))?;
        registry.register(Box::new(workers_in_flight.clone()))?;

        Ok(Self {
            events_published,
            events_rejected,
            events_processed,
            handler_failures,
            workers_in_flight,
        })
    }

    /// Events accepted into the queue.
    pub fn events_published(&self) -> &IntCounter {
        &self.events_published
    }

    /// Rejections for one reason: `shutting_down`, `invalid`, `persistence`
    /// or `queue_full`.
    pub fn events_rejected(&self, reason: &str) -> IntCounter {
        self.events_rejected.with_label_values(&[reason])
    }

    /// Events fully dispatched.
    pub fn events_processed(&self) -> &IntCounter {
        &self.events_processed
    }

    /// Handler failures, panics included.
    pub fn handler_failures(&self) -> &IntCounter {
        &self.handler_failures
    }

    /// Running per-event workers.
    pub fn workers_in_flight(&self) -> &IntGauge {
        &self.workers_in_flight
    }

    pub(crate) fn record(&self, signal: Signal<'_>) {
        match signal {
            Signal::Published => self.events_published.inc(),
            Signal::Rejected(error) => self.events_rejected(reject_reason(error)).inc(),
            Signal::Processed => self.events_processed.inc(),
            Signal::HandlerFailed => self.handler_failures.inc(),
            Signal::WorkerStarted => self.workers_in_flight.inc(),
            Signal::WorkerFinished => self.workers_in_flight.dec(),
        }
    }
}
