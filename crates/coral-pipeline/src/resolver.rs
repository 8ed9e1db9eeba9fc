//! Idempotent conversation resolution.
//!
//! Maps a normalized inbound message onto exactly one active conversation.
//! Creation races under concurrent duplicate webhook delivery are settled by
//! the store's uniqueness constraint: a losing insert re-reads and returns
//! the winning row. Missing channel or agent configuration is fatal per
//! message and never retried, since redelivery cannot fix configuration.

use std::sync::Arc;

use serde_json::Value;

use coral_channels::InboundMessage;
use coral_core::{current_unix_timestamp_ms, new_conversation_id};
use coral_store::{
    ChannelRecord, Conversation, ConversationStatus, ConversationStore, StoreError,
};

use crate::error::PipelineError;

#[derive(Debug, Clone)]
/// Public struct `ResolvedConversation` used across Coral components.
pub struct ResolvedConversation {
    pub conversation: Conversation,
    pub channel: ChannelRecord,
    pub created: bool,
}

/// Public struct `ConversationResolver` used across Coral components.
pub struct ConversationResolver {
    store: Arc<dyn ConversationStore>,
}

impl ConversationResolver {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Resolves the active conversation for an inbound message, creating one
    /// on first contact.
    pub fn resolve(&self, inbound: &InboundMessage) -> Result<ResolvedConversation, PipelineError> {
        let channel = self
            .store
            .find_active_channel(inbound.platform, Some(inbound.external_channel_id.as_str()))?
            .ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "no active {} channel for ref '{}'",
                    inbound.platform.as_str(),
                    inbound.external_channel_id
                ))
            })?;

        if let Some(existing) = self
            .store
            .find_active_conversation(&channel.id, &inbound.external_sender_id)?
        {
            return Ok(ResolvedConversation {
                conversation: existing,
                channel,
                created: false,
            });
        }

        let agent = self
            .store
            .find_active_agent(&channel.tenant_id)?
            .ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "no active agent for tenant '{}'",
                    channel.tenant_id
                ))
            })?;

        let now = current_unix_timestamp_ms();
        let conversation = build_conversation(inbound, &channel, &agent.id, now);

        match self.store.insert_conversation(&conversation) {
            Ok(()) => Ok(ResolvedConversation {
                conversation,
                channel,
                created: true,
            }),
            Err(StoreError::UniqueViolation { .. }) => {
                // A concurrent delivery won the insert; adopt its row.
                let winner = self
                    .store
                    .find_active_conversation(&channel.id, &inbound.external_sender_id)?
                    .ok_or_else(|| {
                        PipelineError::Configuration(format!(
                            "conversation for ({}, {}) vanished during creation race",
                            channel.id, inbound.external_sender_id
                        ))
                    })?;
                Ok(ResolvedConversation {
                    conversation: winner,
                    channel,
                    created: false,
                })
            }
            Err(error) => Err(error.into()),
        }
    }
}

fn build_conversation(
    inbound: &InboundMessage,
    channel: &ChannelRecord,
    agent_id: &str,
    now_unix_ms: u64,
) -> Conversation {
    let customer_name = inbound
        .metadata
        .get("customer_name")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut metadata = std::collections::BTreeMap::new();
    metadata.insert(
        "platform".to_string(),
        Value::String(inbound.platform.as_str().to_string()),
    );

    Conversation {
        id: new_conversation_id(),
        tenant_id: channel.tenant_id.clone(),
        channel_id: channel.id.clone(),
        agent_id: agent_id.to_string(),
        external_id: inbound.external_sender_id.clone(),
        status: ConversationStatus::Active,
        priority: "normal".to_string(),
        customer_name,
        customer_email: None,
        metadata,
        created_unix_ms: now_unix_ms,
        updated_unix_ms: now_unix_ms,
    }
}
