//! Webhook payload normalization for live platform events.
//!
//! Incoming platform-native JSON is converted into canonical
//! `InboundMessage` values before resolution. A single webhook delivery may
//! batch several events; malformed items are surfaced per item with reason
//! codes so siblings in the same delivery still process.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde_json::{Map, Value};

use crate::contract::{
    validate_inbound_message, InboundMessage, MessageAttachment, Platform,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `NormalizationReasonCode` values.
pub enum NormalizationReasonCode {
    InvalidJson,
    UnexpectedShape,
    MissingField,
    InvalidFieldType,
    InvalidTimestamp,
    EmptyContent,
    UnsupportedPlatformObject,
    InvalidNormalizedMessage,
}

impl NormalizationReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::UnexpectedShape => "unexpected_shape",
            Self::MissingField => "missing_field",
            Self::InvalidFieldType => "invalid_field_type",
            Self::InvalidTimestamp => "invalid_timestamp",
            Self::EmptyContent => "empty_content",
            Self::UnsupportedPlatformObject => "unsupported_platform_object",
            Self::InvalidNormalizedMessage => "invalid_normalized_message",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `NormalizationError` used across Coral components.
pub struct NormalizationError {
    pub code: NormalizationReasonCode,
    pub message: String,
}

impl Display for NormalizationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for NormalizationError {}

fn parse_error(
    code: NormalizationReasonCode,
    message: impl Into<String>,
) -> NormalizationError {
    NormalizationError {
        code,
        message: message.into(),
    }
}

/// One normalized event from a webhook delivery: a canonical message, or the
/// per-item failure that must not abort its siblings.
pub type NormalizedItem = Result<InboundMessage, NormalizationError>;

/// Parses a raw webhook body into zero or more canonical messages.
///
/// Deliveries that carry no user message (delivery receipts, read markers,
/// typing indicators, status updates) yield an empty vector, not an error.
/// The outer error covers payloads that are not parseable at all.
pub fn normalize_webhook_payload(
    platform: Platform,
    raw: &str,
) -> Result<Vec<NormalizedItem>, NormalizationError> {
    let payload = serde_json::from_str::<Value>(raw).map_err(|error| {
        parse_error(NormalizationReasonCode::InvalidJson, error.to_string())
    })?;
    let payload = as_object(&payload, "webhook payload")?;

    match platform {
        Platform::Whatsapp => normalize_whatsapp_payload(payload),
        Platform::Messenger | Platform::Instagram => {
            normalize_messaging_payload(platform, payload)
        }
        Platform::Telegram => normalize_telegram_payload(payload),
    }
}

fn normalize_whatsapp_payload(
    payload: &Map<String, Value>,
) -> Result<Vec<NormalizedItem>, NormalizationError> {
    let entries = array_field(payload, "entry")?;
    let mut items = Vec::new();

    for entry in entries {
        let Ok(entry) = as_object(entry, "entry") else {
            items.push(Err(parse_error(
                NormalizationReasonCode::InvalidFieldType,
                "entry must be an object",
            )));
            continue;
        };
        let Some(changes) = entry.get("changes").and_then(Value::as_array) else {
            continue;
        };
        for change in changes {
            let value = change.get("value").and_then(Value::as_object);
            let Some(value) = value else {
                continue;
            };
            // Status-only notifications (sent/delivered/read receipts) carry
            // no user message.
            let Some(messages) = value.get("messages").and_then(Value::as_array) else {
                continue;
            };
            let phone_number_id = value
                .get("metadata")
                .and_then(Value::as_object)
                .and_then(|metadata| optional_string_field(metadata, "phone_number_id"));
            let contact_name = value
                .get("contacts")
                .and_then(Value::as_array)
                .and_then(|contacts| contacts.first())
                .and_then(Value::as_object)
                .and_then(|contact| contact.get("profile"))
                .and_then(Value::as_object)
                .and_then(|profile| optional_string_field(profile, "name"));

            for message in messages {
                items.push(parse_whatsapp_message(
                    message,
                    phone_number_id.as_deref(),
                    contact_name.as_deref(),
                ));
            }
        }
    }

    Ok(items)
}

fn parse_whatsapp_message(
    raw: &Value,
    phone_number_id: Option<&str>,
    contact_name: Option<&str>,
) -> NormalizedItem {
    let message = as_object(raw, "entry.changes.value.messages[]")?;
    let phone_number_id = phone_number_id
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            parse_error(
                NormalizationReasonCode::MissingField,
                "entry.changes.value.metadata.phone_number_id is required",
            )
        })?;

    let message_type = optional_string_field(message, "type").unwrap_or_default();
    if !message_type.is_empty() && message_type != "text" {
        return Err(parse_error(
            NormalizationReasonCode::UnsupportedPlatformObject,
            format!("unsupported whatsapp message type '{message_type}'"),
        ));
    }

    let text = message
        .get("text")
        .and_then(Value::as_object)
        .and_then(|text| optional_string_field(text, "body"))
        .unwrap_or_default();

    let mut metadata = BTreeMap::new();
    metadata.insert(
        "whatsapp_phone_number_id".to_string(),
        Value::String(phone_number_id.to_string()),
    );
    if let Some(name) = contact_name.map(str::trim).filter(|value| !value.is_empty()) {
        metadata.insert(
            "customer_name".to_string(),
            Value::String(name.to_string()),
        );
    }

    finish_item(InboundMessage {
        platform: Platform::Whatsapp,
        external_message_id: required_string_field(message, "id", "messages[].id")?,
        external_sender_id: required_string_field(message, "from", "messages[].from")?,
        external_channel_id: phone_number_id.to_string(),
        text,
        attachments: Vec::new(),
        received_unix_ms: required_unix_seconds_field(message, "timestamp")?
            .saturating_mul(1000),
        metadata,
    })
}

fn normalize_messaging_payload(
    platform: Platform,
    payload: &Map<String, Value>,
) -> Result<Vec<NormalizedItem>, NormalizationError> {
    let entries = array_field(payload, "entry")?;
    let mut items = Vec::new();

    for entry in entries {
        let Ok(entry) = as_object(entry, "entry") else {
            items.push(Err(parse_error(
                NormalizationReasonCode::InvalidFieldType,
                "entry must be an object",
            )));
            continue;
        };
        let channel_ref = optional_string_field(entry, "id").unwrap_or_default();
        let Some(events) = entry.get("messaging").and_then(Value::as_array) else {
            continue;
        };
        for event in events {
            let Ok(event) = as_object(event, "entry.messaging[]") else {
                items.push(Err(parse_error(
                    NormalizationReasonCode::InvalidFieldType,
                    "entry.messaging[] must be an object",
                )));
                continue;
            };
            // Delivery receipts, read markers, and postbacks carry no user
            // message text.
            let Some(message) = event.get("message").and_then(Value::as_object) else {
                continue;
            };
            if message
                .get("is_echo")
                .and_then(Value::as_bool)
                .unwrap_or(false)
            {
                continue;
            }
            items.push(parse_messaging_event(platform, event, message, &channel_ref));
        }
    }

    Ok(items)
}

fn parse_messaging_event(
    platform: Platform,
    event: &Map<String, Value>,
    message: &Map<String, Value>,
    channel_ref: &str,
) -> NormalizedItem {
    let sender = event
        .get("sender")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            parse_error(
                NormalizationReasonCode::MissingField,
                "messaging[].sender is required",
            )
        })?;
    let external_channel_id = if channel_ref.trim().is_empty() {
        event
            .get("recipient")
            .and_then(Value::as_object)
            .and_then(|recipient| optional_string_field(recipient, "id"))
            .unwrap_or_default()
    } else {
        channel_ref.trim().to_string()
    };

    let external_message_id = required_string_field(message, "mid", "messaging[].message.mid")?;
    let text = optional_string_field(message, "text").unwrap_or_default();
    let attachments = parse_messaging_attachments(
        message.get("attachments"),
        external_message_id.as_str(),
    );

    finish_item(InboundMessage {
        platform,
        external_message_id,
        external_sender_id: required_string_field(sender, "id", "messaging[].sender.id")?,
        external_channel_id,
        text,
        attachments,
        received_unix_ms: required_u64_field(event, "timestamp")?,
        metadata: BTreeMap::new(),
    })
}

fn parse_messaging_attachments(
    raw: Option<&Value>,
    message_id: &str,
) -> Vec<MessageAttachment> {
    let Some(rows) = raw.and_then(Value::as_array) else {
        return Vec::new();
    };
    rows.iter()
        .enumerate()
        .filter_map(|(index, row)| {
            let row = row.as_object()?;
            let url = row
                .get("payload")
                .and_then(Value::as_object)
                .and_then(|payload| optional_string_field(payload, "url"))?;
            Some(MessageAttachment {
                attachment_id: format!("{message_id}-{index}"),
                url,
                content_type: optional_string_field(row, "type").unwrap_or_default(),
                file_name: String::new(),
            })
        })
        .collect()
}

fn normalize_telegram_payload(
    payload: &Map<String, Value>,
) -> Result<Vec<NormalizedItem>, NormalizationError> {
    // Updates without a message object (callback queries, poll updates,
    // member changes) carry no user message.
    let message = payload
        .get("message")
        .or_else(|| payload.get("edited_message"))
        .and_then(Value::as_object);
    let Some(message) = message else {
        return Ok(Vec::new());
    };

    Ok(vec![parse_telegram_message(payload, message)])
}

fn parse_telegram_message(
    payload: &Map<String, Value>,
    message: &Map<String, Value>,
) -> NormalizedItem {
    let chat = message.get("chat").and_then(Value::as_object).ok_or_else(|| {
        parse_error(
            NormalizationReasonCode::MissingField,
            "message.chat is required",
        )
    })?;
    let from = message.get("from").and_then(Value::as_object).ok_or_else(|| {
        parse_error(
            NormalizationReasonCode::MissingField,
            "message.from is required",
        )
    })?;

    let external_message_id = optional_string_field(message, "message_id")
        .or_else(|| optional_string_field(payload, "update_id"))
        .ok_or_else(|| {
            parse_error(
                NormalizationReasonCode::MissingField,
                "message.message_id or update_id is required",
            )
        })?;

    let text = optional_string_field(message, "text")
        .or_else(|| optional_string_field(message, "caption"))
        .unwrap_or_default();

    let mut metadata = BTreeMap::new();
    if let Some(update_id) = optional_string_field(payload, "update_id") {
        metadata.insert("telegram_update_id".to_string(), Value::String(update_id));
    }
    if let Some(username) = optional_string_field(from, "username")
        .or_else(|| optional_string_field(from, "first_name"))
    {
        metadata.insert("customer_name".to_string(), Value::String(username));
    }

    finish_item(InboundMessage {
        platform: Platform::Telegram,
        external_message_id,
        external_sender_id: required_string_field(from, "id", "message.from.id")?,
        external_channel_id: required_string_field(chat, "id", "message.chat.id")?,
        text,
        attachments: Vec::new(),
        received_unix_ms: required_unix_seconds_field(message, "date")?.saturating_mul(1000),
        metadata,
    })
}

fn finish_item(message: InboundMessage) -> NormalizedItem {
    if message.text.trim().is_empty() && message.attachments.is_empty() {
        return Err(parse_error(
            NormalizationReasonCode::EmptyContent,
            "normalized message must include non-empty text or at least one attachment",
        ));
    }
    validate_inbound_message(&message).map_err(|error| {
        parse_error(
            NormalizationReasonCode::InvalidNormalizedMessage,
            error.to_string(),
        )
    })?;
    Ok(message)
}

fn as_object<'a>(
    value: &'a Value,
    label: &str,
) -> Result<&'a Map<String, Value>, NormalizationError> {
    value.as_object().ok_or_else(|| {
        parse_error(
            NormalizationReasonCode::UnexpectedShape,
            format!("{label} must be a JSON object"),
        )
    })
}

fn array_field<'a>(
    object: &'a Map<String, Value>,
    name: &str,
) -> Result<&'a Vec<Value>, NormalizationError> {
    object
        .get(name)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            parse_error(
                NormalizationReasonCode::UnexpectedShape,
                format!("payload.{name} must be an array"),
            )
        })
}

fn optional_string_field(object: &Map<String, Value>, name: &str) -> Option<String> {
    match object.get(name)? {
        Value::String(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

fn required_string_field(
    object: &Map<String, Value>,
    name: &str,
    label: &str,
) -> Result<String, NormalizationError> {
    optional_string_field(object, name).ok_or_else(|| {
        parse_error(
            NormalizationReasonCode::MissingField,
            format!("{label} is required"),
        )
    })
}

fn required_u64_field(
    object: &Map<String, Value>,
    name: &str,
) -> Result<u64, NormalizationError> {
    let value = object.get(name).ok_or_else(|| {
        parse_error(
            NormalizationReasonCode::InvalidTimestamp,
            format!("{name} is required"),
        )
    })?;
    parse_u64_value(value).ok_or_else(|| {
        parse_error(
            NormalizationReasonCode::InvalidTimestamp,
            format!("{name} must be a positive integer"),
        )
    })
}

/// Accepts both JSON numbers and the string-encoded epoch seconds WhatsApp
/// uses.
fn required_unix_seconds_field(
    object: &Map<String, Value>,
    name: &str,
) -> Result<u64, NormalizationError> {
    required_u64_field(object, name)
}

fn parse_u64_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(raw) => raw.trim().parse::<u64>().ok(),
        _ => None,
    }
}
