use model::events::{BatchEvent, Event};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

/// A subscription handle that can be used to unsubscribe from events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    subscriber_id: u64,
}

/// Fan-out of batch lifecycle events to operator hooks.
///
/// Publishing never blocks the engine: a subscriber whose channel is full
/// misses the event.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<u64, mpsc::Sender<Arc<BatchEvent>>>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, capacity: usize) -> (Subscription, mpsc::Receiver<Arc<BatchEvent>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let subscriber_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().await.insert(subscriber_id, tx);
        debug!(subscriber_id, "Subscribed to batch events");
        (Subscription { subscriber_id }, rx)
    }

    pub async fn publish(&self, event: BatchEvent) {
        let event_type = event.event_type();
        let event = Arc::new(event);
        let subscribers = self.subscribers.read().await;

        if subscribers.is_empty() {
            debug!(event_type, "No subscribers for event");
            return;
        }

        for (subscriber_id, sender) in subscribers.iter() {
            // try_send is non-blocking. If channel is full, it returns error.
            if let Err(e) = sender.try_send(event.clone()) {
                warn!(
                    event_type,
                    subscriber_id = subscriber_id,
                    error = %e,
                    "Dropped event for slow or closed subscriber"
                );
            }
        }
    }

    pub async fn unsubscribe(&self, subscription: Subscription) {
        self.subscribers
            .write()
            .await
            .remove(&subscription.subscriber_id);
        debug!(
            subscriber_id = subscription.subscriber_id,
            "Unsubscribed from batch events"
        );
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use model::core::identifiers::BatchId;

    fn resumed() -> BatchEvent {
        BatchEvent::Resumed {
            batch_id: BatchId::new("b"),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn delivers_to_every_subscriber() {
        let bus = EventBus::new();
        let (_, mut a) = bus.subscribe(4).await;
        let (_, mut b) = bus.subscribe(4).await;

        bus.publish(resumed()).await;

        assert_eq!(a.recv().await.unwrap().event_type(), "batch.resumed");
        assert_eq!(b.recv().await.unwrap().event_type(), "batch.resumed");
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let bus = EventBus::new();
        let (sub, mut rx) = bus.subscribe(1).await;

        bus.publish(resumed()).await;
        bus.publish(resumed()).await;

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());

        bus.unsubscribe(sub).await;
        assert_eq!(bus.subscriber_count().await, 0);
    }
}
