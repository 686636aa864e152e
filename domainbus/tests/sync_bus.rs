//! Behaviour of the synchronous bus as seen by a producer.

use domainbus::prelude::*;
use domainbus::testing::MockHandler;
use proptest::prelude::*;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio_test::{assert_err, assert_ok};

fn event(name: &str) -> Event {
    Event::new(name, "example-1", json!({ "title": "first" }))
}

#[tokio::test]
async fn created_event_reaches_only_interested_handler() {
    let bus = EventBus::new();
    let created = Arc::new(MockHandler::new(Interest::name("example.created")).named("h1"));
    let deleted = Arc::new(MockHandler::new(Interest::name("example.deleted")).named("h2"));
    bus.subscribe(created.clone());
    bus.subscribe(deleted.clone());

    assert_ok!(bus.publish(&EventContext::new(), event("example.created")).await);

    assert_eq!(created.received_count(), 1);
    assert_eq!(deleted.received_count(), 0);
}

#[tokio::test]
async fn handlers_run_in_subscription_order() {
    let bus = EventBus::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    for label in ["a", "b", "c", "d"] {
        let order = Arc::clone(&order);
        bus.subscribe(Arc::new(from_fn(Interest::All, move |_ctx, _event| {
            let order = Arc::clone(&order);
            async move {
                order.lock().expect("order lock").push(label);
                Ok(())
            }
        })));
    }

    assert_ok!(bus.publish(&EventContext::new(), event("example.created")).await);
    assert_eq!(*order.lock().expect("order lock"), vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn failing_handler_stops_the_rest_and_is_returned() {
    let bus = EventBus::new();
    let before = Arc::new(MockHandler::new(Interest::All).named("before"));
    let failing = Arc::new(MockHandler::new(Interest::All).named("failing"));
    let after = Arc::new(MockHandler::new(Interest::All).named("after"));
    failing.set_should_error(true);
    bus.subscribe(before.clone());
    bus.subscribe(failing.clone());
    bus.subscribe(after.clone());

    let error = assert_err!(bus.publish(&EventContext::new(), event("example.created")).await);

    assert_eq!(
        error.handler_error().map(ToString::to_string),
        Some("failing rejected example.created".to_string())
    );
    assert_eq!(before.received_count(), 1);
    assert_eq!(failing.received_count(), 1);
    assert_eq!(after.received_count(), 0);
}

#[tokio::test]
async fn duplicate_subscription_is_called_twice_and_removed_once() {
    let bus = EventBus::new();
    let handler = Arc::new(MockHandler::new(Interest::All));
    let as_dyn: Arc<dyn EventHandler> = handler.clone();
    bus.subscribe(Arc::clone(&as_dyn));
    bus.subscribe(Arc::clone(&as_dyn));

    assert_ok!(bus.publish(&EventContext::new(), event("example.created")).await);
    assert_eq!(handler.received_count(), 2);

    assert!(bus.unsubscribe(&as_dyn));
    assert_ok!(bus.publish(&EventContext::new(), event("example.created")).await);
    assert_eq!(handler.received_count(), 3);
}

#[tokio::test]
async fn typed_handler_receives_decoded_kind() {
    #[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
    struct Renamed {
        title: String,
    }

    #[derive(Debug, EventKind, PartialEq)]
    #[event(namespace = "example")]
    enum ExampleEvent {
        Renamed(Renamed),
        Archived,
    }

    struct Titles(Mutex<Vec<String>>);

    #[async_trait::async_trait]
    impl KindHandler<ExampleEvent> for Titles {
        async fn handle_kind(
            &self,
            _ctx: &EventContext,
            _event: &Event,
            kind: ExampleEvent,
        ) -> HandlerResult<()> {
            if let ExampleEvent::Renamed(renamed) = kind {
                self.0.lock().expect("titles lock").push(renamed.title);
            }
            Ok(())
        }
    }

    let bus = EventBus::new();
    let titles = Arc::new(Typed::<ExampleEvent, _>::new(Titles(Mutex::new(Vec::new()))));
    bus.subscribe(titles.clone());

    let renamed = ExampleEvent::Renamed(Renamed {
        title: "second".into(),
    });
    let ctx = EventContext::new();
    assert_ok!(bus.publish(&ctx, assert_ok!(Event::from_kind("example-1", &renamed))).await);
    assert_ok!(bus.publish(&ctx, assert_ok!(Event::from_kind("example-1", &ExampleEvent::Archived))).await);
    assert_ok!(bus.publish(&ctx, event("invoice.paid")).await);

    assert_eq!(*titles.inner().0.lock().expect("titles lock"), vec!["second".to_string()]);
}

#[tokio::test]
async fn noop_bus_accepts_everything() {
    let bus: Arc<dyn Bus> = Arc::new(NoopEventBus);
    let handler = Arc::new(MockHandler::new(Interest::All));
    bus.subscribe(handler.clone());

    assert_ok!(bus.publish(&EventContext::new(), event("example.created")).await);
    assert_eq!(handler.received_count(), 0);
}

proptest! {
    #[test]
    fn only_handlers_whose_interest_matches_are_called(
        interests in proptest::collection::vec(prop_oneof![
            Just("example.created"),
            Just("example.deleted"),
            Just("invoice.paid"),
        ], 0..12),
    ) {
        let bus = EventBus::new();
        let handlers: Vec<_> = interests
            .iter()
            .map(|name| {
                let handler = Arc::new(MockHandler::new(Interest::name(*name)));
                bus.subscribe(handler.clone());
                handler
            })
            .collect();

        let published = tokio_test::block_on(
            bus.publish(&EventContext::new(), event("example.created")),
        );
        prop_assert!(published.is_ok());

        for (name, handler) in interests.iter().zip(&handlers) {
            let expected = usize::from(*name == "example.created");
            prop_assert_eq!(handler.received_count(), expected);
        }
    }
}
