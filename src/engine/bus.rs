//! Code cell event bus.
//!
//! An explicit publish/subscribe registry scoped to one client session.
//! Each subscriber gets its own unbounded channel, so a slow subscriber never
//! stalls a context worker and every subscriber observes events in publish
//! order. There is no replay: a subscriber only sees events published after
//! it subscribed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::models::event::CodeCellEvent;

/// Handle identifying one subscription on an [`EventBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Receiving end of a bus subscription.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<CodeCellEvent>,
}

impl Subscription {
    /// Handle used to [`unsubscribe`](EventBus::unsubscribe).
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event. Returns `None` once unsubscribed or the bus is dropped.
    pub async fn recv(&mut self) -> Option<CodeCellEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<CodeCellEvent> {
        self.rx.try_recv().ok()
    }
}

/// Fan-out registry delivering [`CodeCellEvent`]s to current subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<CodeCellEvent>>>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub async fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.insert(id, tx);
        debug!(subscription = id.0, "event bus: subscriber added");
        Subscription { id, rx }
    }

    /// Remove a subscriber. Returns `false` if the handle was unknown.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.lock().await.remove(&id).is_some();
        if removed {
            debug!(subscription = id.0, "event bus: subscriber removed");
        }
        removed
    }

    /// Deliver `event` to every current subscriber.
    ///
    /// Subscribers whose receiver was dropped are pruned. Returns the number
    /// of subscribers that received the event.
    pub async fn publish(&self, event: CodeCellEvent) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        let mut delivered = 0;
        subscribers.retain(|id, tx| {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                debug!(subscription = id.0, "event bus: pruning closed subscriber");
                false
            }
        });
        delivered
    }

    /// Number of registered subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}
