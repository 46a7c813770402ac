use crate::types::HubMessage;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Fan-out of [`HubMessage`]s to every connected observer.
///
/// Each subscriber owns a bounded queue. `broadcast` never waits: a subscriber
/// whose queue is full or closed is dropped and the message still reaches the
/// rest.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    subscribers: DashMap<u64, mpsc::Sender<HubMessage>>,
    next_id: AtomicU64,
    capacity: usize,
}

pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<HubMessage>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<HubMessage> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<HubMessage> {
        self.receiver.try_recv().ok()
    }

    pub fn into_stream(self) -> ReceiverStream<HubMessage> {
        ReceiverStream::new(self.receiver)
    }
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.inner.capacity);
        self.inner.subscribers.insert(id, sender);
        debug!(subscriber = id, "observer connected");
        Subscription { id, receiver }
    }

    pub fn unsubscribe(&self, id: u64) {
        if self.inner.subscribers.remove(&id).is_some() {
            debug!(subscriber = id, "observer disconnected");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Delivers `message` to every subscriber and returns how many accepted it.
    pub fn broadcast(&self, message: HubMessage) -> usize {
        let mut delivered = 0;
        let mut dropped = Vec::new();
        for entry in self.inner.subscribers.iter() {
            match entry.value().try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_) | TrySendError::Closed(_)) => dropped.push(*entry.key()),
            }
        }
        // Removal happens after iteration; removing while a shard is read-locked deadlocks.
        for id in dropped {
            self.inner.subscribers.remove(&id);
            debug!(subscriber = id, kind = %message.kind, "dropped unresponsive observer");
        }
        delivered
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_broadcast_reaches_every_subscriber() {
        let hub = BroadcastHub::new(8);
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        let delivered = hub.broadcast(HubMessage::new("session:created", json!({ "id": "a" })));

        assert_eq!(delivered, 2);
        assert_eq!(first.recv().await.unwrap().kind, "session:created");
        assert_eq!(second.recv().await.unwrap().kind, "session:created");
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_dropped_without_losing_message() {
        let hub = BroadcastHub::new(8);
        let closed = hub.subscribe();
        let mut open = hub.subscribe();
        drop(closed);

        let delivered = hub.broadcast(HubMessage::new("event:created", json!({})));

        assert_eq!(delivered, 1);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(open.recv().await.unwrap().kind, "event:created");
    }

    #[test]
    fn test_full_subscriber_is_dropped() {
        let hub = BroadcastHub::new(1);
        let _slow = hub.subscribe();

        assert_eq!(hub.broadcast(HubMessage::new("session:updated", json!(1))), 1);
        assert_eq!(hub.broadcast(HubMessage::new("session:updated", json!(2))), 0);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe_removes_member() {
        let hub = BroadcastHub::default();
        let sub = hub.subscribe();
        hub.unsubscribe(sub.id());
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.broadcast(HubMessage::new("review:resolved", json!({}))), 0);
    }

    #[test]
    fn test_message_topic() {
        let message = HubMessage::new("approval:requested", json!({}));
        assert_eq!(message.topic(), "approval");
    }
}
