//! Event persistence collaborator.
//!
//! The asynchronous bus saves every event before queueing it and marks it
//! processed once its handlers have run. The storage engine itself lives
//! outside this crate; [`EventStore`] is the narrow interface the bus needs.
//!
//! Two implementations ship with the crate:
//!
//! - [`NoopEventStore`] accepts everything and remembers nothing. It is the
//!   default when persistence is not required.
//! - [`InMemoryEventStore`] keeps events in memory. Intended for tests and
//!   local development.

use crate::error::{StoreError, StoreResult};
use crate::event::Event;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

/// Persistence interface consumed by the asynchronous bus.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Persists an event.
    ///
    /// Saving an event whose id is already stored replaces the stored copy,
    /// so a replayed event does not create a duplicate record.
    async fn save_event(&self, event: &Event) -> StoreResult<()>;

    /// Returns events named `event_type` that occurred at or after `since`,
    /// oldest first.
    async fn get_events(&self, event_type: &str, since: DateTime<Utc>) -> StoreResult<Vec<Event>>;

    /// Records that every handler has run for this event.
    async fn mark_processed(&self, event_id: Uuid) -> StoreResult<()>;
}

/// Store that accepts every call and keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventStore;

#[async_trait]
impl EventStore for NoopEventStore {
    async fn save_event(&self, _event: &Event) -> StoreResult<()> {
        Ok(())
    }

    async fn get_events(&self, _event_type: &str, _since: DateTime<Utc>) -> StoreResult<Vec<Event>> {
        Ok(Vec::new())
    }

    async fn mark_processed(&self, _event_id: Uuid) -> StoreResult<()> {
        Ok(())
    }
}

/// A stored event and when it was marked processed.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    /// The persisted event.
    pub event: Event,
    /// When the bus last reported the event as processed.
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Records {
    order: Vec<Uuid>,
    by_id: HashMap<Uuid, StoredEvent>,
}

/// In-memory event store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    records: RwLock<Records>,
}

impl InMemoryEventStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-loaded with events, e.g. history to replay.
    pub fn with_events(events: impl IntoIterator<Item = Event>) -> Self {
        let store = Self::new();
        {
            let mut records = store.records.write().unwrap_or_else(PoisonError::into_inner);
            for event in events {
                insert(&mut records, event);
            }
        }
        store
    }

    /// Returns the number of stored events.
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a stored event by id.
    pub fn get(&self, event_id: Uuid) -> Option<StoredEvent> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .get(&event_id)
            .cloned()
    }

    /// Returns `true` once the event has been marked processed.
    pub fn is_processed(&self, event_id: Uuid) -> bool {
        self.get(event_id)
            .is_some_and(|stored| stored.processed_at.is_some())
    }

    /// Returns every stored event in insertion order.
    pub fn all(&self) -> Vec<StoredEvent> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records
            .order
            .iter()
            .filter_map(|id| records.by_id.get(id).cloned())
            .collect()
    }
}

fn insert(records: &mut Records, event: Event) {
    let id = event.event_id();
    match records.by_id.get_mut(&id) {
        Some(stored) => stored.event = event,
        None => {
            records.order.push(id);
            records.by_id.insert(
                id,
                StoredEvent {
                    event,
                    processed_at: None,
                },
            );
        }
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn save_event(&self, event: &Event) -> StoreResult<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        insert(&mut records, event.clone());
        Ok(())
    }

    async fn get_events(&self, event_type: &str, since: DateTime<Utc>) -> StoreResult<Vec<Event>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut events: Vec<Event> = records
            .order
            .iter()
            .filter_map(|id| records.by_id.get(id))
            .map(|stored| &stored.event)
            .filter(|event| event.event_name() == event_type && event.occurred_at() >= since)
            .cloned()
            .collect();
        events.sort_by_key(Event::occurred_at);
        Ok(events)
    }

    async fn mark_processed(&self, event_id: Uuid) -> StoreResult<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        match records.by_id.get_mut(&event_id) {
            Some(stored) => {
                stored.processed_at = Some(Utc::now());
                Ok(())
            }
            None => Err(StoreError::backend(format!("event {event_id} is not stored"))),
        }
    }
}
