//! Replaying stored history through the asynchronous bus.
#![cfg(feature = "async")]

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use domainbus::prelude::*;
use domainbus::testing::{MockEventStore, MockHandler};
use domainbus::StoreOperation;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

fn stored(name: &str, occurred_at: DateTime<Utc>) -> Event {
    Event::restore(Uuid::new_v4(), name, "example-1", occurred_at, json!({}))
}

#[tokio::test]
async fn replay_republishes_exactly_the_stored_range_once() {
    let now = Utc::now();
    let cutoff = now - ChronoDuration::hours(1);
    let too_old = stored("example.created", now - ChronoDuration::hours(3));
    let in_range: Vec<Event> = (1..=4)
        .map(|minutes| stored("example.created", now - ChronoDuration::minutes(minutes * 10)))
        .collect();
    let other_type = stored("example.deleted", now - ChronoDuration::minutes(5));

    let mut history = vec![too_old.clone(), other_type.clone()];
    history.extend(in_range.iter().cloned());
    let store = Arc::new(MockEventStore::with_events(history));

    let bus = assert_ok!(AsyncEventBus::builder()
        .with_event_store(store.clone())
        .build());
    let handler = Arc::new(MockHandler::new(Interest::All));
    bus.subscribe(handler.clone());

    let replayed = assert_ok!(
        bus.replay_events(&EventContext::new(), "example.created", cutoff)
            .await
    );
    assert_ok!(bus.close(Duration::from_secs(5)).await);

    assert_eq!(replayed, in_range.len());
    store.spy().assert_called_once("get_events");
    store.spy().assert_called_times("save_event", in_range.len());

    let mut deliveries: HashMap<Uuid, usize> = HashMap::new();
    for event in handler.received_events() {
        *deliveries.entry(event.event_id()).or_default() += 1;
    }
    let expected: HashMap<Uuid, usize> = in_range.iter().map(|event| (event.event_id(), 1)).collect();
    assert_eq!(deliveries, expected);

    // Re-saving a replayed event replaces the stored record.
    assert_eq!(store.inner().len(), in_range.len() + 2);
    assert!(in_range
        .iter()
        .all(|event| store.inner().is_processed(event.event_id())));
    assert!(!store.inner().is_processed(too_old.event_id()));
}

#[tokio::test]
async fn replay_with_nothing_stored_is_a_no_op() {
    let bus = assert_ok!(AsyncEventBus::new());
    let replayed = assert_ok!(
        bus.replay_events(&EventContext::new(), "example.created", Utc::now())
            .await
    );
    assert_eq!(replayed, 0);
    assert_ok!(bus.close(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn replay_stops_at_first_rejected_publish() {
    let now = Utc::now();
    let history: Vec<Event> = (1..=3)
        .map(|minutes| stored("example.created", now - ChronoDuration::minutes(minutes)))
        .collect();
    let store = Arc::new(MockEventStore::with_events(history));
    let bus = assert_ok!(AsyncEventBus::builder()
        .with_event_store(store.clone())
        .with_queue_size(1)
        .with_worker_count(1)
        .build());

    // Nothing drains the queue until the test yields, so the second publish
    // finds it full.
    let error = assert_err!(
        bus.replay_events(&EventContext::new(), "example.created", now - ChronoDuration::hours(1))
            .await
    );
    match error {
        EventBusError::Replay {
            replayed,
            total,
            source,
        } => {
            assert_eq!(replayed, 1);
            assert_eq!(total, 3);
            assert!(source.is_queue_full());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_ok!(bus.close(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn replay_reports_store_load_failure() {
    let store = Arc::new(MockEventStore::new());
    store.set_fail_load(true);
    let bus = assert_ok!(AsyncEventBus::builder()
        .with_event_store(store.clone())
        .build());

    let error = assert_err!(
        bus.replay_events(&EventContext::new(), "example.created", Utc::now())
            .await
    );
    assert!(matches!(
        error,
        EventBusError::Persistence {
            operation: StoreOperation::Load,
            ..
        }
    ));
    assert_ok!(bus.close(Duration::from_secs(1)).await);
}
