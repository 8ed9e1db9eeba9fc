use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use coral_channels::{ChannelCredentials, Platform};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `RecordStatus` values.
pub enum RecordStatus {
    Active,
    Disabled,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "active" => Some(Self::Active),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `ChannelRecord` used across Coral components.
pub struct ChannelRecord {
    pub id: String,
    pub tenant_id: String,
    pub platform: Platform,
    /// Platform-side channel identity: WhatsApp phone-number id,
    /// Messenger/Instagram page id, Telegram bot id.
    pub external_ref: String,
    pub status: RecordStatus,
    pub credentials: ChannelCredentials,
    pub created_unix_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `AgentRecord` used across Coral components.
pub struct AgentRecord {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub status: RecordStatus,
    pub persona: String,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub tone: String,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub document_scope: Vec<String>,
    pub created_unix_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `ConversationStatus` values.
pub enum ConversationStatus {
    Active,
    Resolved,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "active" => Some(Self::Active),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `Conversation` used across Coral components.
pub struct Conversation {
    pub id: String,
    pub tenant_id: String,
    pub channel_id: String,
    pub agent_id: String,
    /// Platform-side identity of the customer, the second half of the
    /// `(channel_id, external_id)` active-conversation key.
    pub external_id: String,
    pub status: ConversationStatus,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub created_unix_ms: u64,
    pub updated_unix_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `MessageSender` values.
pub enum MessageSender {
    Customer,
    Agent,
    System,
}

impl MessageSender {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Agent => "agent",
            Self::System => "system",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "customer" => Some(Self::Customer),
            "agent" => Some(Self::Agent),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `MessageRecord` used across Coral components.
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,
    pub content: String,
    pub sender: MessageSender,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub created_unix_ms: u64,
}
