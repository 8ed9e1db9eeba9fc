//! In-memory `ConversationStore` used by tests and single-process setups.

use std::collections::HashMap;
use std::sync::Mutex;

use coral_channels::Platform;

use crate::records::{
    AgentRecord, ChannelRecord, Conversation, ConversationStatus, MessageRecord,
    RecordStatus,
};
use crate::store::{ConversationStore, StoreError};

#[derive(Debug, Default)]
struct MemoryStoreInner {
    channels: Vec<ChannelRecord>,
    agents: Vec<AgentRecord>,
    conversations: HashMap<String, Conversation>,
    messages: Vec<MessageRecord>,
}

/// Volatile store backend with the same uniqueness semantics as the SQLite
/// backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryStoreInner> {
        // Lock poisoning only happens after a panic in another test thread;
        // recover the data rather than cascading the failure.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ConversationStore for MemoryStore {
    fn insert_channel(&self, channel: &ChannelRecord) -> Result<(), StoreError> {
        self.lock().channels.push(channel.clone());
        Ok(())
    }

    fn insert_agent(&self, agent: &AgentRecord) -> Result<(), StoreError> {
        self.lock().agents.push(agent.clone());
        Ok(())
    }

    fn find_active_channel(
        &self,
        platform: Platform,
        external_ref: Option<&str>,
    ) -> Result<Option<ChannelRecord>, StoreError> {
        let inner = self.lock();

        if let Some(external_ref) = external_ref.map(str::trim).filter(|value| !value.is_empty()) {
            let exact = inner.channels.iter().find(|channel| {
                channel.platform == platform
                    && channel.status == RecordStatus::Active
                    && channel.external_ref == external_ref
            });
            if exact.is_some() {
                return Ok(exact.cloned());
            }
        }

        Ok(inner
            .channels
            .iter()
            .filter(|channel| channel.platform == platform && channel.status == RecordStatus::Active)
            .min_by_key(|channel| channel.created_unix_ms)
            .cloned())
    }

    fn find_active_agent(&self, tenant_id: &str) -> Result<Option<AgentRecord>, StoreError> {
        Ok(self
            .lock()
            .agents
            .iter()
            .filter(|agent| agent.tenant_id == tenant_id && agent.status == RecordStatus::Active)
            .min_by_key(|agent| agent.created_unix_ms)
            .cloned())
    }

    fn agent_by_id(&self, agent_id: &str) -> Result<Option<AgentRecord>, StoreError> {
        Ok(self
            .lock()
            .agents
            .iter()
            .find(|agent| agent.id == agent_id)
            .cloned())
    }

    fn find_active_conversation(
        &self,
        channel_id: &str,
        external_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        Ok(self
            .lock()
            .conversations
            .values()
            .find(|conversation| {
                conversation.channel_id == channel_id
                    && conversation.external_id == external_id
                    && conversation.status == ConversationStatus::Active
            })
            .cloned())
    }

    fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let duplicate = conversation.status == ConversationStatus::Active
            && inner.conversations.values().any(|existing| {
                existing.channel_id == conversation.channel_id
                    && existing.external_id == conversation.external_id
                    && existing.status == ConversationStatus::Active
            });
        if duplicate {
            return Err(StoreError::UniqueViolation {
                channel_id: conversation.channel_id.clone(),
                external_id: conversation.external_id.clone(),
            });
        }
        inner
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    fn touch_conversation(
        &self,
        conversation_id: &str,
        now_unix_ms: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let conversation = inner
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::ConversationNotFound(conversation_id.to_string()))?;
        conversation.updated_unix_ms = now_unix_ms;
        conversation.status = ConversationStatus::Active;
        Ok(())
    }

    fn insert_message(&self, message: &MessageRecord) -> Result<(), StoreError> {
        self.lock().messages.push(message.clone());
        Ok(())
    }

    fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let inner = self.lock();
        let mut messages = inner
            .messages
            .iter()
            .filter(|message| message.conversation_id == conversation_id)
            .cloned()
            .collect::<Vec<_>>();
        messages.sort_by(|left, right| {
            left.created_unix_ms
                .cmp(&right.created_unix_ms)
                .then_with(|| left.id.cmp(&right.id))
        });
        if messages.len() > limit {
            messages.drain(..messages.len() - limit);
        }
        Ok(messages)
    }
}
