use thiserror::Error;

use coral_channels::Platform;

use crate::records::{AgentRecord, ChannelRecord, Conversation, MessageRecord};

#[derive(Debug, Error)]
/// Enumerates supported `StoreError` values.
pub enum StoreError {
    #[error("active conversation already exists for (channel '{channel_id}', external '{external_id}')")]
    UniqueViolation {
        channel_id: String,
        external_id: String,
    },
    #[error("conversation '{0}' not found")]
    ConversationNotFound(String),
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait contract for `ConversationStore` behavior.
///
/// Backends must treat the `(channel_id, external_id, status=active)` key as
/// unique and report concurrent insert races as `UniqueViolation` rather than
/// an opaque failure; the resolver relies on that variant to re-read the
/// winning row.
pub trait ConversationStore: Send + Sync {
    fn insert_channel(&self, channel: &ChannelRecord) -> Result<(), StoreError>;

    fn insert_agent(&self, agent: &AgentRecord) -> Result<(), StoreError>;

    /// Finds the active channel for `platform`, preferring an exact
    /// `external_ref` match when a hint is supplied.
    fn find_active_channel(
        &self,
        platform: Platform,
        external_ref: Option<&str>,
    ) -> Result<Option<ChannelRecord>, StoreError>;

    fn find_active_agent(&self, tenant_id: &str) -> Result<Option<AgentRecord>, StoreError>;

    fn agent_by_id(&self, agent_id: &str) -> Result<Option<AgentRecord>, StoreError>;

    fn find_active_conversation(
        &self,
        channel_id: &str,
        external_id: &str,
    ) -> Result<Option<Conversation>, StoreError>;

    fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError>;

    /// Bumps `updated_unix_ms` and forces the row back to `active`.
    fn touch_conversation(&self, conversation_id: &str, now_unix_ms: u64)
        -> Result<(), StoreError>;

    fn insert_message(&self, message: &MessageRecord) -> Result<(), StoreError>;

    /// Returns the most recent `limit` messages for a conversation in
    /// original (oldest-first) order.
    fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StoreError>;
}
