//! Ordered subscription storage shared by the buses.

use crate::handler::{EventHandler, HandlerId};
use std::sync::{Arc, PoisonError, RwLock};

/// Handler entry stored in a bus.
#[derive(Clone)]
pub(crate) struct HandlerEntry {
    pub(crate) id: HandlerId,
    pub(crate) handler: Arc<dyn EventHandler>,
}

/// Subscriptions in the order they were made.
///
/// Readers only hold the lock long enough to copy the list; no handler ever
/// runs under it.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    entries: RwLock<Vec<HandlerEntry>>,
}

impl HandlerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends a subscription. The same handler may be added more than once.
    pub(crate) fn subscribe(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        let id = HandlerId::new();
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(HandlerEntry { id, handler });
        id
    }

    /// Removes the first subscription of this exact handler allocation.
    pub(crate) fn unsubscribe(&self, handler: &Arc<dyn EventHandler>) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries
            .iter()
            .position(|entry| same_handler(&entry.handler, handler))
        {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Removes the subscription with this id.
    pub(crate) fn off(&self, id: HandlerId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.iter().position(|entry| entry.id == id) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Copies the current subscriptions.
    pub(crate) fn snapshot(&self) -> Vec<HandlerEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Identity comparison on the data pointer; vtable pointers are ignored.
fn same_handler(a: &Arc<dyn EventHandler>, b: &Arc<dyn EventHandler>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
