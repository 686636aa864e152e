//! A bus that drops everything.

use crate::bus::Bus;
use crate::context::EventContext;
use crate::error::EventBusResult;
use crate::event::Event;
use crate::handler::{EventHandler, HandlerId};
use async_trait::async_trait;
use std::sync::Arc;

/// Bus used when event distribution is turned off.
///
/// Every subscription and publish succeeds and no handler is ever called.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventBus;

#[async_trait]
impl Bus for NoopEventBus {
    fn subscribe(&self, _handler: Arc<dyn EventHandler>) -> HandlerId {
        HandlerId::new()
    }

    fn unsubscribe(&self, _handler: &Arc<dyn EventHandler>) -> bool {
        false
    }

    async fn publish(&self, _ctx: &EventContext, _event: Event) -> EventBusResult<()> {
        Ok(())
    }
}
