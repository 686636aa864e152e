//! Per-call context handed to `publish` and to every handler invocation.
//!
//! The context carries a correlation id, an optional deadline and a
//! cooperative cancellation flag. Buses only pass it along; cancelling is
//! always the caller's decision, and handlers decide whether to honour it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Context shared between a publisher and the handlers it reaches.
///
/// Clones share the same cancellation flag, so a publisher that keeps a
/// clone can signal handlers that are still running on the worker pool.
///
/// # Examples
///
/// ```rust
/// use domainbus::EventContext;
/// use std::time::Duration;
///
/// let ctx = EventContext::new().with_timeout(Duration::from_secs(5));
/// let for_handlers = ctx.clone();
///
/// ctx.cancel();
/// assert!(for_handlers.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct EventContext {
    correlation_id: Uuid,
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl EventContext {
    /// Creates a context with a fresh correlation id and no deadline.
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Uses an existing correlation id, e.g. one taken from an inbound request.
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Sets a deadline `timeout` from now.
    ///
    /// A timeout too large to represent as an instant leaves the context
    /// without a deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    /// Sets an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Returns the correlation id.
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Returns the deadline, if one was set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the time left before the deadline, `None` without a deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Signals cancellation to every clone of this context.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once cancelled or past the deadline.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

impl Default for EventContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_is_live() {
        let ctx = EventContext::new();
        assert!(!ctx.is_cancelled());
        assert!(ctx.deadline().is_none());
        assert!(ctx.remaining().is_none());
    }

    #[test]
    fn test_cancel_is_shared_by_clones() {
        let ctx = EventContext::new();
        let clone = ctx.clone();
        clone.cancel();
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.correlation_id(), clone.correlation_id());
    }

    #[test]
    fn test_expired_deadline_counts_as_cancelled() {
        let ctx = EventContext::new().with_deadline(Instant::now());
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));

        let ctx = EventContext::new().with_timeout(Duration::from_secs(60));
        assert!(!ctx.is_cancelled());
        assert!(ctx.remaining().is_some_and(|left| left > Duration::from_secs(30)));
    }

    #[test]
    fn test_unrepresentable_timeout_means_no_deadline() {
        let ctx = EventContext::new().with_timeout(Duration::MAX);
        assert!(ctx.deadline().is_none());
        assert!(ctx.remaining().is_none());
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn test_correlation_id_override() {
        let id = Uuid::new_v4();
        let ctx = EventContext::new().with_correlation_id(id);
        assert_eq!(ctx.correlation_id(), id);
    }
}
