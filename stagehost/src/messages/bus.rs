//! Synchronous publish/subscribe bus.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{Message, MessageHandler};

/// Handle returned by [`MessageBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Delivers each published message to every subscribed listener.
///
/// Publishing is synchronous and serial: every listener has handled a message
/// before `publish` returns, in subscription order.
#[derive(Default)]
pub struct MessageBus {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn MessageHandler>)>>,
    next_id: AtomicU64,
}

impl MessageBus {
    /// Creates a bus with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener.
    pub fn subscribe(&self, listener: Arc<dyn MessageHandler>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Removes a listener. Returns whether it was subscribed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Publishes a message to all current listeners.
    pub fn publish(&self, message: &Message) {
        // Listeners run outside the lock so they may subscribe or unsubscribe.
        let snapshot: Vec<Arc<dyn MessageHandler>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in &snapshot {
            message.dispatch(listener.as_ref());
        }
    }

    /// Returns the number of listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Returns true if nobody is listening.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("listener_count", &self.len())
            .finish()
    }
}
