//! Basic domainbus usage: typed event kinds on the synchronous bus.
//!
//! Run with `RUST_LOG=debug cargo run --example basic_example` to see the
//! bus's own logging.

use domainbus::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderPlaced {
    customer: String,
    total_cents: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderCancelled {
    reason: String,
}

#[derive(Debug, EventKind)]
#[event(namespace = "order")]
enum OrderEvent {
    Placed(OrderPlaced),
    Cancelled(OrderCancelled),
    Shipped,
}

/// Keeps a running revenue figure.
#[derive(Default)]
struct Revenue {
    cents: AtomicU64,
}

#[async_trait::async_trait]
impl KindHandler<OrderEvent> for Revenue {
    async fn handle_kind(&self, _ctx: &EventContext, event: &Event, kind: OrderEvent) -> HandlerResult<()> {
        match kind {
            OrderEvent::Placed(placed) => {
                self.cents.fetch_add(placed.total_cents, Ordering::SeqCst);
                println!("  revenue: +{} from {}", placed.total_cents, placed.customer);
            }
            OrderEvent::Cancelled(cancelled) => {
                println!("  revenue: {} cancelled ({})", event.aggregate_id(), cancelled.reason);
            }
            OrderEvent::Shipped => {}
        }
        Ok(())
    }

    fn handler_name(&self) -> &'static str {
        "revenue"
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("domainbus basic example");

    let bus = EventBus::new();

    let revenue = Arc::new(Typed::<OrderEvent, _>::new(Revenue::default()));
    bus.subscribe(revenue.clone());

    bus.subscribe(Arc::new(
        from_fn(Interest::namespace("order"), |_ctx, event| async move {
            println!("  audit: {}", event.log_description());
            Ok(())
        })
        .named("audit"),
    ));

    let ctx = EventContext::new();
    let events = [
        Event::from_kind(
            "order-1",
            &OrderEvent::Placed(OrderPlaced {
                customer: "ada".into(),
                total_cents: 4_200,
            }),
        )?,
        Event::from_kind(
            "order-2",
            &OrderEvent::Placed(OrderPlaced {
                customer: "grace".into(),
                total_cents: 1_300,
            }),
        )?,
        Event::from_kind(
            "order-2",
            &OrderEvent::Cancelled(OrderCancelled {
                reason: "duplicate".into(),
            }),
        )?,
        Event::from_kind("order-1", &OrderEvent::Shipped)?,
    ];

    for event in events {
        println!("publishing {}", event.event_name());
        bus.publish(&ctx, event).await?;
    }

    // A handler error stops dispatch and comes back to the publisher.
    bus.subscribe(Arc::new(
        from_fn(Interest::name("order.refunded"), |_ctx, _event| async {
            Err(HandlerError::failed("refunds are not supported"))
        })
        .named("refunds"),
    ));
    let refund = Event::new("order.refunded", "order-1", serde_json::json!({}));
    if let Err(error) = bus.publish(&ctx, refund).await {
        println!("publish failed: {error}");
    }

    println!(
        "total revenue: {} cents",
        revenue.inner().cents.load(Ordering::SeqCst)
    );
    Ok(())
}
