//! Real-time fan-out seam.
//!
//! Publishing is strictly best-effort: the pipeline logs and swallows
//! failures because the exchange is already durably stored by the time an
//! event is emitted.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `ConversationEventKind` values.
pub enum ConversationEventKind {
    MessageCreated,
    ConversationNotification,
}

impl ConversationEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MessageCreated => "message_created",
            Self::ConversationNotification => "conversation_notification",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `ConversationEvent` used across Coral components.
pub struct ConversationEvent {
    pub event_id: String,
    pub tenant_id: String,
    pub kind: ConversationEventKind,
    pub conversation_id: String,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    /// Short text excerpt for dashboards and notification toasts.
    pub preview: String,
    pub emitted_unix_ms: u64,
}

#[async_trait]
/// Trait contract for `Broadcaster` behavior.
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, event: ConversationEvent) -> Result<()>;
}

/// Tenant-scoped broadcast over an in-process channel; dashboards subscribe
/// per process.
#[derive(Debug)]
pub struct LocalBroadcaster {
    sender: broadcast::Sender<ConversationEvent>,
}

impl LocalBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.sender.subscribe()
    }
}

impl Default for LocalBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Broadcaster for LocalBroadcaster {
    async fn publish(&self, event: ConversationEvent) -> Result<()> {
        // A send with no live subscribers is not a failure; dashboards come
        // and go independently of message processing.
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Broadcaster, ConversationEvent, ConversationEventKind, LocalBroadcaster,
    };

    fn sample_event(kind: ConversationEventKind) -> ConversationEvent {
        ConversationEvent {
            event_id: "evt-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            kind,
            conversation_id: "conv-1".to_string(),
            message_id: Some("msg-1".to_string()),
            sender: Some("agent".to_string()),
            preview: "hello".to_string(),
            emitted_unix_ms: 1,
        }
    }

    #[tokio::test]
    async fn functional_subscribers_receive_published_events() {
        let broadcaster = LocalBroadcaster::default();
        let mut receiver = broadcaster.subscribe();

        broadcaster
            .publish(sample_event(ConversationEventKind::MessageCreated))
            .await
            .expect("publish");

        let event = receiver.recv().await.expect("event");
        assert_eq!(event.kind, ConversationEventKind::MessageCreated);
        assert_eq!(event.tenant_id, "tenant-1");
    }

    #[tokio::test]
    async fn regression_publishing_without_subscribers_is_not_an_error() {
        let broadcaster = LocalBroadcaster::new(4);
        broadcaster
            .publish(sample_event(ConversationEventKind::ConversationNotification))
            .await
            .expect("publish without subscribers");
    }
}
