//! Worker-pool dispatch with persistence, backpressure, replay and shutdown.

use chrono::Utc;
use domainbus::prelude::*;
use domainbus::{DispatchFailure, InMemoryEventStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let store = Arc::new(InMemoryEventStore::new());
    let started_at = Utc::now();

    let bus = AsyncEventBus::builder()
        .with_queue_size(8)
        .with_worker_count(2)
        .with_event_store(store.clone())
        .with_error_callback(Arc::new(|failure: &DispatchFailure| {
            eprintln!("dispatch failure: {failure}");
        }))
        .build()?;

    bus.subscribe(Arc::new(
        from_fn(Interest::namespace("shipment"), |_ctx, event| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            println!("notified carrier about {}", event.log_description());
            Ok(())
        })
        .named("carrier"),
    ));
    bus.subscribe(Arc::new(
        from_fn(Interest::name("shipment.lost"), |_ctx, _event| async {
            Err(HandlerError::failed("insurance claim service is down"))
        })
        .named("insurance"),
    ));

    let ctx = EventContext::new();
    let mut accepted = 0;
    let mut rejected = 0;
    for n in 0..20 {
        let name = if n % 7 == 6 { "shipment.lost" } else { "shipment.dispatched" };
        let event = Event::new(name, format!("shipment-{n}"), json!({ "n": n }));
        match bus.publish(&ctx, event).await {
            Ok(()) => accepted += 1,
            Err(error) if error.is_queue_full() => rejected += 1,
            Err(error) => return Err(error.into()),
        }
    }
    println!("accepted {accepted}, rejected {rejected} (queue full)");
    println!("queued {}, in flight {}", bus.queued(), bus.in_flight());

    tokio::time::sleep(Duration::from_secs(1)).await;

    let replayed = bus
        .replay_events(&ctx, "shipment.lost", started_at)
        .await?;
    println!("replayed {replayed} lost shipments");

    bus.close(Duration::from_secs(5)).await?;
    println!("stored {} events", store.len());
    Ok(())
}
