//! Type-keyed registry of event listeners.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tracing::error;

use crate::channel::{MessageType, ProcessEvent};

/// Callback invoked for every event of the type it was registered for.
pub type Listener = Arc<dyn Fn(&ProcessEvent) + Send + Sync>;

/// Handle returned by `add`, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: RwLock<HashMap<MessageType, Vec<(ListenerId, Listener)>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, message_type: MessageType, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .await
            .entry(message_type)
            .or_default()
            .push((id, listener));
        id
    }

    /// Returns `false` if no such listener was registered for `message_type`.
    pub async fn remove(&self, message_type: MessageType, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().await;
        let Some(registered) = listeners.get_mut(&message_type) else {
            return false;
        };
        let before = registered.len();
        registered.retain(|(existing, _)| *existing != id);
        before != registered.len()
    }

    pub async fn count(&self, message_type: MessageType) -> usize {
        self.listeners
            .read()
            .await
            .get(&message_type)
            .map_or(0, Vec::len)
    }

    /// Invoke every listener for the event's type. A panicking listener is
    /// logged and skipped. Returns how many listeners completed normally.
    pub async fn dispatch(&self, event: &ProcessEvent) -> usize {
        let targets: Vec<(ListenerId, Listener)> = self
            .listeners
            .read()
            .await
            .get(&event.message_type())
            .cloned()
            .unwrap_or_default();

        let mut delivered = 0;
        for (id, listener) in targets {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(_) => error!(
                    listener = ?id,
                    message_type = ?event.message_type(),
                    process_id = %event.process_id(),
                    "Listener panicked"
                ),
            }
        }
        delivered
    }
}
