//! Outbound reply delivery for platform send APIs.
//!
//! Applies per-platform payload shaping, safe-length chunking, and response
//! classification. Retryable versus terminal failures are exposed through
//! structured errors so callers can log and move on; the pipeline treats a
//! persisted reply as recoverable even when delivery fails.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::redirect::Policy;
use serde::Serialize;
use serde_json::{json, Value};

use crate::contract::{ChannelCredentials, Platform};

const WHATSAPP_SAFE_MAX_CHARS: usize = 1024;
const MESSENGER_SAFE_MAX_CHARS: usize = 2000;
const INSTAGRAM_SAFE_MAX_CHARS: usize = 2000;
const TELEGRAM_SAFE_MAX_CHARS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `OutboundMode` values.
pub enum OutboundMode {
    /// Shape requests and return receipts without touching the network.
    DryRun,
    Provider,
}

impl OutboundMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DryRun => "dry_run",
            Self::Provider => "provider",
        }
    }
}

#[derive(Debug, Clone)]
/// Public struct `OutboundConfig` used across Coral components.
pub struct OutboundConfig {
    pub mode: OutboundMode,
    pub max_chars: usize,
    pub http_timeout_ms: u64,
    pub whatsapp_api_base: String,
    pub graph_api_base: String,
    pub telegram_api_base: String,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            mode: OutboundMode::Provider,
            max_chars: 4096,
            http_timeout_ms: 5000,
            whatsapp_api_base: "https://graph.facebook.com/v20.0".to_string(),
            graph_api_base: "https://graph.facebook.com/v20.0".to_string(),
            telegram_api_base: "https://api.telegram.org".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
/// Public struct `DeliveryReceipt` used across Coral components.
pub struct DeliveryReceipt {
    pub platform: String,
    pub mode: String,
    pub status: String,
    pub chunk_index: usize,
    pub chunk_count: usize,
    pub endpoint: String,
    pub request_body: Value,
    pub http_status: Option<u16>,
    pub provider_message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `DeliveryError` used across Coral components.
pub struct DeliveryError {
    pub reason_code: String,
    pub detail: String,
    pub retryable: bool,
    pub endpoint: String,
    pub http_status: Option<u16>,
}

impl Display for DeliveryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.reason_code, self.detail)
    }
}

impl std::error::Error for DeliveryError {}

#[derive(Debug, Clone)]
struct OutboundRequest {
    platform: Platform,
    endpoint: String,
    headers: Vec<(String, String)>,
    body: Value,
    chunk_index: usize,
    chunk_count: usize,
}

#[derive(Debug, Clone)]
/// Public struct `OutboundDispatcher` used across Coral components.
pub struct OutboundDispatcher {
    config: OutboundConfig,
    client: Option<reqwest::Client>,
}

impl OutboundDispatcher {
    pub fn new(config: OutboundConfig) -> Result<Self> {
        if config.max_chars == 0 {
            return Err(anyhow!("outbound max chars must be greater than 0"));
        }
        if config.mode == OutboundMode::Provider && config.http_timeout_ms == 0 {
            return Err(anyhow!("outbound provider mode requires http timeout > 0"));
        }
        let client = if config.mode == OutboundMode::Provider {
            Some(
                reqwest::Client::builder()
                    .timeout(Duration::from_millis(config.http_timeout_ms))
                    .redirect(Policy::none())
                    .build()
                    .context("failed to build outbound http client")?,
            )
        } else {
            None
        };
        Ok(Self { config, client })
    }

    pub fn mode(&self) -> OutboundMode {
        self.config.mode
    }

    /// Sends `text` to `recipient_id` through the platform's send API,
    /// chunked to the platform's safe message length.
    pub async fn send_reply(
        &self,
        platform: Platform,
        recipient_id: &str,
        text: &str,
        credentials: &ChannelCredentials,
    ) -> Result<Vec<DeliveryReceipt>, DeliveryError> {
        let requests = self.build_requests(platform, recipient_id, text, credentials)?;
        let mut receipts = Vec::with_capacity(requests.len());
        for request in requests {
            match self.config.mode {
                OutboundMode::DryRun => {
                    receipts.push(DeliveryReceipt {
                        platform: request.platform.as_str().to_string(),
                        mode: self.config.mode.as_str().to_string(),
                        status: "dry_run".to_string(),
                        chunk_index: request.chunk_index,
                        chunk_count: request.chunk_count,
                        endpoint: request.endpoint.clone(),
                        request_body: request.body.clone(),
                        http_status: None,
                        provider_message_id: None,
                    });
                }
                OutboundMode::Provider => {
                    receipts.push(self.send_request(&request).await?);
                }
            }
        }
        Ok(receipts)
    }

    fn build_requests(
        &self,
        platform: Platform,
        recipient_id: &str,
        text: &str,
        credentials: &ChannelCredentials,
    ) -> Result<Vec<OutboundRequest>, DeliveryError> {
        let recipient = recipient_id.trim();
        if recipient.is_empty() {
            return Err(delivery_error(
                "delivery_invalid_recipient",
                "recipient id cannot be empty",
                false,
                String::new(),
            ));
        }
        credentials.validate_for(platform).map_err(|error| {
            delivery_error(
                "delivery_missing_credentials",
                error.to_string(),
                false,
                String::new(),
            )
        })?;

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let safe_max_chars = safe_max_chars(platform);
        let chunk_max = self.config.max_chars.min(safe_max_chars).max(1);
        let chunks = chunk_text(trimmed, chunk_max);
        let chunk_count = chunks.len();

        chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| {
                self.build_request_for_chunk(
                    platform,
                    recipient,
                    chunk,
                    index + 1,
                    chunk_count,
                    credentials,
                )
            })
            .collect()
    }

    fn build_request_for_chunk(
        &self,
        platform: Platform,
        recipient: &str,
        chunk: String,
        chunk_index: usize,
        chunk_count: usize,
        credentials: &ChannelCredentials,
    ) -> Result<OutboundRequest, DeliveryError> {
        let bearer = |token: &Option<String>| {
            vec![(
                "Authorization".to_string(),
                format!("Bearer {}", token.as_deref().unwrap_or("").trim()),
            )]
        };
        let (endpoint, headers, body) = match platform {
            Platform::Whatsapp => {
                let phone_number_id = credentials
                    .phone_number_id
                    .as_deref()
                    .unwrap_or("")
                    .trim()
                    .to_string();
                (
                    format!(
                        "{}/{}/messages",
                        self.config.whatsapp_api_base.trim_end_matches('/'),
                        phone_number_id
                    ),
                    bearer(&credentials.access_token),
                    json!({
                        "messaging_product": "whatsapp",
                        "recipient_type": "individual",
                        "to": recipient,
                        "type": "text",
                        "text": {"body": chunk},
                    }),
                )
            }
            Platform::Messenger | Platform::Instagram => (
                format!(
                    "{}/me/messages",
                    self.config.graph_api_base.trim_end_matches('/')
                ),
                bearer(&credentials.access_token),
                json!({
                    "recipient": {"id": recipient},
                    "messaging_type": "RESPONSE",
                    "message": {"text": chunk},
                }),
            ),
            Platform::Telegram => {
                let bot_token = credentials.bot_token.as_deref().unwrap_or("").trim();
                (
                    format!(
                        "{}/bot{}/sendMessage",
                        self.config.telegram_api_base.trim_end_matches('/'),
                        bot_token
                    ),
                    Vec::new(),
                    json!({
                        "chat_id": recipient,
                        "text": chunk,
                    }),
                )
            }
        };

        Ok(OutboundRequest {
            platform,
            endpoint,
            headers,
            body,
            chunk_index,
            chunk_count,
        })
    }

    async fn send_request(
        &self,
        request: &OutboundRequest,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let client = self.client.as_ref().ok_or_else(|| {
            delivery_error(
                "delivery_provider_client_unavailable",
                "provider mode requested without initialized HTTP client",
                false,
                request.endpoint.clone(),
            )
        })?;

        let mut http_request = client.post(&request.endpoint);
        for (header, value) in &request.headers {
            http_request = http_request.header(header, value);
        }
        let response = http_request
            .json(&request.body)
            .send()
            .await
            .map_err(|error| {
                delivery_error(
                    "delivery_transport_error",
                    error.to_string(),
                    true,
                    request.endpoint.clone(),
                )
            })?;

        let status = response.status();
        let body_raw = response.text().await.unwrap_or_default();
        let body_json = serde_json::from_str::<Value>(&body_raw).unwrap_or(Value::Null);

        if status.is_success() {
            return Ok(DeliveryReceipt {
                platform: request.platform.as_str().to_string(),
                mode: self.config.mode.as_str().to_string(),
                status: "sent".to_string(),
                chunk_index: request.chunk_index,
                chunk_count: request.chunk_count,
                endpoint: request.endpoint.clone(),
                request_body: request.body.clone(),
                http_status: Some(status.as_u16()),
                provider_message_id: extract_provider_message_id(request.platform, &body_json),
            });
        }

        let retryable = status.as_u16() == 429 || status.is_server_error();
        Err(DeliveryError {
            reason_code: "delivery_provider_status".to_string(),
            detail: format!(
                "provider returned status {} for chunk {}/{}: {}",
                status.as_u16(),
                request.chunk_index,
                request.chunk_count,
                truncate_detail(&body_raw)
            ),
            retryable,
            endpoint: request.endpoint.clone(),
            http_status: Some(status.as_u16()),
        })
    }
}

fn delivery_error(
    reason_code: &str,
    detail: impl Into<String>,
    retryable: bool,
    endpoint: String,
) -> DeliveryError {
    DeliveryError {
        reason_code: reason_code.to_string(),
        detail: detail.into(),
        retryable,
        endpoint,
        http_status: None,
    }
}

fn safe_max_chars(platform: Platform) -> usize {
    match platform {
        Platform::Whatsapp => WHATSAPP_SAFE_MAX_CHARS,
        Platform::Messenger => MESSENGER_SAFE_MAX_CHARS,
        Platform::Instagram => INSTAGRAM_SAFE_MAX_CHARS,
        Platform::Telegram => TELEGRAM_SAFE_MAX_CHARS,
    }
}

fn extract_provider_message_id(platform: Platform, body: &Value) -> Option<String> {
    match platform {
        Platform::Whatsapp => body
            .get("messages")
            .and_then(Value::as_array)
            .and_then(|messages| messages.first())
            .and_then(|message| message.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string),
        Platform::Messenger | Platform::Instagram => body
            .get("message_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        Platform::Telegram => body
            .get("result")
            .and_then(|result| result.get("message_id"))
            .map(|id| match id {
                Value::String(value) => value.clone(),
                other => other.to_string(),
            }),
    }
}

fn truncate_detail(raw: &str) -> String {
    const MAX_DETAIL_CHARS: usize = 512;
    if raw.chars().count() <= MAX_DETAIL_CHARS {
        return raw.to_string();
    }
    raw.chars().take(MAX_DETAIL_CHARS).collect()
}

fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    if text.is_empty() || max_chars == 0 {
        return Vec::new();
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    for ch in text.chars() {
        current.push(ch);
        current_len = current_len.saturating_add(1);
        if current_len >= max_chars {
            chunks.push(current);
            current = String::new();
            current_len = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
