//! EventBus capability (spec §4.1, §6 event channel grammar)
//!
//! Delivery is at-least-once; no ordering is guaranteed across channels,
//! but a single channel's events arrive FIFO to each subscriber.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::Result;
use crate::types::Event;

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, channel: &str, event: Event) -> Result<()>;
    async fn subscribe(&self, channel_pattern: &str) -> Result<BoxStream<'static, Event>>;
    /// Cheap liveness probe for the `Health` operation (spec §6).
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// `*` matches exactly one `.`-delimited segment; `**` as the final segment
/// matches the remainder of the topic (spec §6 grammar
/// `memory.<user_id>.<agent_id>.<event_type>`).
pub fn topic_matches(pattern: &str, channel: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('.').collect();
    let channel_segments: Vec<&str> = channel.split('.').collect();

    for (i, pattern_segment) in pattern_segments.iter().enumerate() {
        if *pattern_segment == "**" {
            return true;
        }
        match channel_segments.get(i) {
            Some(channel_segment) => {
                if *pattern_segment != "*" && pattern_segment != channel_segment {
                    return false;
                }
            }
            None => return false,
        }
    }
    pattern_segments.len() == channel_segments.len()
}

#[derive(Clone)]
struct Envelope {
    channel: String,
    event: Event,
}

pub struct InMemoryEventBus {
    sender: broadcast::Sender<Envelope>,
}

impl InMemoryEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        InMemoryEventBus { sender }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, channel: &str, event: Event) -> Result<()> {
        // No subscribers is not an error: at-least-once applies to those
        // currently listening, matching the teacher's broadcast-channel idiom.
        let _ = self.sender.send(Envelope {
            channel: channel.to_string(),
            event,
        });
        Ok(())
    }

    async fn subscribe(&self, channel_pattern: &str) -> Result<BoxStream<'static, Event>> {
        let pattern = channel_pattern.to_string();
        let receiver = self.sender.subscribe();
        let stream = BroadcastStream::new(receiver)
            .filter_map(|item| async move { item.ok() })
            .filter_map(move |envelope| {
                let matched = topic_matches(&pattern, &envelope.channel);
                async move { matched.then_some(envelope.event) }
            });
        Ok(Box::pin(stream))
    }
}
