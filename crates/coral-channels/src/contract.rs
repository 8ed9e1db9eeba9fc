//! Canonical inbound contract shared by normalization, resolution, and
//! delivery.
//!
//! Platform-specific webhook shapes are reduced to `InboundMessage` before
//! any routing or pipeline work; validation here keeps downstream code free
//! of per-platform field checks.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `Platform` values.
pub enum Platform {
    Whatsapp,
    Messenger,
    Instagram,
    Telegram,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Whatsapp => "whatsapp",
            Self::Messenger => "messenger",
            Self::Instagram => "instagram",
            Self::Telegram => "telegram",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "whatsapp" => Some(Self::Whatsapp),
            "messenger" | "facebook" => Some(Self::Messenger),
            "instagram" => Some(Self::Instagram),
            "telegram" => Some(Self::Telegram),
            _ => None,
        }
    }

    /// Platforms using the Meta webhook conventions (`hub.challenge`
    /// subscription verification, `x-hub-signature-256` payload signing).
    pub fn uses_meta_webhooks(self) -> bool {
        matches!(self, Self::Whatsapp | Self::Messenger | Self::Instagram)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `MessageAttachment` used across Coral components.
pub struct MessageAttachment {
    pub attachment_id: String,
    pub url: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `InboundMessage` used across Coral components.
///
/// The canonical, platform-agnostic form of one user message. Produced by
/// normalization, consumed within a single pipeline invocation, never
/// persisted as-is.
pub struct InboundMessage {
    pub platform: Platform,
    pub external_message_id: String,
    pub external_sender_id: String,
    /// Platform-side channel identity (phone-number id, page id, chat id).
    pub external_channel_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<MessageAttachment>,
    pub received_unix_ms: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

pub fn validate_inbound_message(message: &InboundMessage) -> Result<()> {
    if message.external_message_id.trim().is_empty() {
        bail!("inbound message has empty external_message_id");
    }
    if message.external_sender_id.trim().is_empty() {
        bail!("inbound message has empty external_sender_id");
    }
    if message.external_channel_id.trim().is_empty() {
        bail!("inbound message has empty external_channel_id");
    }
    if message.received_unix_ms == 0 {
        bail!("inbound message has zero received_unix_ms");
    }
    if message.text.trim().is_empty() && message.attachments.is_empty() {
        bail!("inbound message must include non-empty text or at least one attachment");
    }
    if message.metadata.keys().any(|key| key.trim().is_empty()) {
        bail!("inbound message includes empty metadata key");
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `ChannelCredentials` used across Coral components.
///
/// Per-channel secrets for the platform send APIs. Which fields are required
/// depends on the platform; `validate_for` is the single checkpoint.
pub struct ChannelCredentials {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub phone_number_id: Option<String>,
    #[serde(default)]
    pub page_id: Option<String>,
    #[serde(default)]
    pub bot_token: Option<String>,
}

impl ChannelCredentials {
    pub fn validate_for(&self, platform: Platform) -> Result<()> {
        let has = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .is_some_and(|value| !value.is_empty())
        };
        match platform {
            Platform::Whatsapp => {
                if !has(&self.access_token) {
                    bail!("whatsapp channel requires access_token");
                }
                if !has(&self.phone_number_id) {
                    bail!("whatsapp channel requires phone_number_id");
                }
            }
            Platform::Messenger | Platform::Instagram => {
                if !has(&self.access_token) {
                    bail!("{} channel requires access_token", platform.as_str());
                }
            }
            Platform::Telegram => {
                if !has(&self.bot_token) {
                    bail!("telegram channel requires bot_token");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{
        validate_inbound_message, ChannelCredentials, InboundMessage, Platform,
    };

    fn sample_message() -> InboundMessage {
        InboundMessage {
            platform: Platform::Whatsapp,
            external_message_id: "wamid.1".to_string(),
            external_sender_id: "15551230000".to_string(),
            external_channel_id: "15550001111".to_string(),
            text: "hello".to_string(),
            attachments: Vec::new(),
            received_unix_ms: 1_700_000_000_000,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn unit_platform_string_round_trips() {
        for platform in [
            Platform::Whatsapp,
            Platform::Messenger,
            Platform::Instagram,
            Platform::Telegram,
        ] {
            assert_eq!(Platform::parse(platform.as_str()), Some(platform));
        }
        assert_eq!(Platform::parse("facebook"), Some(Platform::Messenger));
        assert_eq!(Platform::parse("sms"), None);
    }

    #[test]
    fn unit_meta_webhook_convention_covers_graph_platforms_only() {
        assert!(Platform::Whatsapp.uses_meta_webhooks());
        assert!(Platform::Messenger.uses_meta_webhooks());
        assert!(Platform::Instagram.uses_meta_webhooks());
        assert!(!Platform::Telegram.uses_meta_webhooks());
    }

    #[test]
    fn unit_validate_inbound_message_rejects_empty_identifiers() {
        let mut message = sample_message();
        message.external_sender_id = " ".to_string();
        let error = validate_inbound_message(&message).expect_err("empty sender");
        assert!(error.to_string().contains("external_sender_id"));

        let mut message = sample_message();
        message.text = String::new();
        let error = validate_inbound_message(&message).expect_err("no content");
        assert!(error.to_string().contains("non-empty text"));
    }

    #[test]
    fn unit_credentials_validation_is_platform_specific() {
        let credentials = ChannelCredentials {
            access_token: Some("token".to_string()),
            phone_number_id: Some("123".to_string()),
            page_id: None,
            bot_token: None,
        };
        credentials.validate_for(Platform::Whatsapp).expect("whatsapp ok");
        credentials.validate_for(Platform::Messenger).expect("messenger ok");
        let error = credentials
            .validate_for(Platform::Telegram)
            .expect_err("telegram needs bot token");
        assert!(error.to_string().contains("bot_token"));

        let missing_phone = ChannelCredentials {
            access_token: Some("token".to_string()),
            ..ChannelCredentials::default()
        };
        let error = missing_phone
            .validate_for(Platform::Whatsapp)
            .expect_err("whatsapp needs phone number id");
        assert!(error.to_string().contains("phone_number_id"));
    }
}
