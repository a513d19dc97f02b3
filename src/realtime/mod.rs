//! Real-time coordinator (spec §4.7)
//!
//! Generalizes the teacher's `realtime::server::RealtimeManager` (a
//! broadcast channel plus an `RwLock<HashMap>` client registry) into a
//! per-subscriber bounded queue so the "never drop `memory_deleted`, drop
//! oldest non-critical" backpressure policy can be enforced per queue
//! rather than relying on a single broadcast channel's uniform lag policy.

use dashmap::DashMap;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::Result;
use crate::storage::eventbus::topic_matches;
use crate::types::Event;

pub type SubscriptionId = Uuid;

struct SubscriberState {
    pattern: String,
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl SubscriberState {
    fn push(&self, event: Event) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            if event.event_type.is_critical() {
                // memory_deleted is never dropped; the queue grows past
                // capacity rather than lose it (spec §4.7).
            } else if let Some(pos) = queue.iter().position(|e| !e.event_type.is_critical()) {
                queue.remove(pos);
                self.dropped.fetch_add(1, Ordering::Relaxed);
            } else {
                // queue is saturated with critical events only; let it grow.
            }
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_waiters();
    }

    async fn pop(&self) -> Event {
        loop {
            let notified = self.notify.notified();
            if let Some(event) = self.queue.lock().pop_front() {
                return event;
            }
            notified.await;
        }
    }
}

/// Coordinates event fan-out with per-subscriber backpressure (spec §4.7).
pub struct RealtimeCoordinator {
    subscribers: DashMap<SubscriptionId, Arc<SubscriberState>>,
    queue_capacity: usize,
}

impl RealtimeCoordinator {
    pub fn new(queue_capacity: usize) -> Self {
        RealtimeCoordinator {
            subscribers: DashMap::new(),
            queue_capacity,
        }
    }

    pub fn subscribe(&self, channel_pattern: &str) -> (SubscriptionId, BoxStream<'static, Event>) {
        let id = Uuid::new_v4();
        let state = Arc::new(SubscriberState {
            pattern: channel_pattern.to_string(),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: self.queue_capacity,
            dropped: AtomicU64::new(0),
        });
        self.subscribers.insert(id, state.clone());
        let stream = futures::stream::unfold(state, |state| async move {
            let event = state.pop().await;
            Some((event, state))
        });
        (id, stream.boxed())
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.remove(&id);
    }

    /// Events published for a single `memory_id` are delivered in
    /// write-commit order (spec §5); fan-out to each matching subscriber
    /// preserves that order since `push` only appends.
    pub async fn publish(&self, event: Event) -> Result<()> {
        let topic = event.topic();
        for subscriber in self.subscribers.iter() {
            if topic_matches(&subscriber.pattern, &topic) {
                subscriber.push(event.clone());
            }
        }
        Ok(())
    }

    pub fn dropped_count(&self, id: SubscriptionId) -> u64 {
        self.subscribers
            .get(&id)
            .map(|s| s.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventType;
    use chrono::Utc;

    fn event(event_type: EventType) -> Event {
        Event {
            event_type,
            memory_id: Some(Uuid::new_v4()),
            session_id: None,
            agent_id: "a1".into(),
            user_id: "u1".into(),
            timestamp: Utc::now(),
            data: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_matching_event() {
        let coordinator = RealtimeCoordinator::new(8);
        let (_, mut stream) = coordinator.subscribe("memory.u1.*.memory_added");
        coordinator.publish(event(EventType::MemoryAdded)).await.unwrap();
        let received = stream.next().await.unwrap();
        assert_eq!(received.event_type, EventType::MemoryAdded);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_non_critical_event() {
        let coordinator = RealtimeCoordinator::new(2);
        let (id, mut stream) = coordinator.subscribe("memory.u1.**");
        coordinator.publish(event(EventType::MemoryAdded)).await.unwrap();
        coordinator.publish(event(EventType::MemoryUpdated)).await.unwrap();
        coordinator.publish(event(EventType::SessionStarted)).await.unwrap();

        assert_eq!(coordinator.dropped_count(id), 1);
        let first = stream.next().await.unwrap();
        assert_eq!(first.event_type, EventType::MemoryUpdated);
        let second = stream.next().await.unwrap();
        assert_eq!(second.event_type, EventType::SessionStarted);
    }

    #[tokio::test]
    async fn memory_deleted_is_never_dropped_even_when_queue_is_full() {
        let coordinator = RealtimeCoordinator::new(1);
        let (id, mut stream) = coordinator.subscribe("memory.u1.**");
        coordinator.publish(event(EventType::MemoryAdded)).await.unwrap();
        coordinator.publish(event(EventType::MemoryDeleted)).await.unwrap();

        assert_eq!(coordinator.dropped_count(id), 0);
        let first = stream.next().await.unwrap();
        assert_eq!(first.event_type, EventType::MemoryAdded);
        let second = stream.next().await.unwrap();
        assert_eq!(second.event_type, EventType::MemoryDeleted);
    }
}
