use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `MessageRole` values.
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `ChatMessage` used across Coral components.
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `ChatRequest` used across Coral components.
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
/// Public struct `ChatUsage` used across Coral components.
pub struct ChatUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `ChatResponse` used across Coral components.
pub struct ChatResponse {
    pub content: String,
    pub finish_reason: Option<String>,
    pub usage: ChatUsage,
    pub model: String,
}

#[derive(Debug, Error)]
/// Enumerates supported `AiError` values.
pub enum AiError {
    #[error("missing API key")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `ProviderErrorKind` values.
pub enum ProviderErrorKind {
    Auth,
    RateLimited,
    Transient,
    Invalid,
}

impl ProviderErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::RateLimited => "rate_limited",
            Self::Transient => "transient",
            Self::Invalid => "invalid",
        }
    }
}

impl AiError {
    /// Classifies a provider failure for caller-side policy decisions.
    pub fn classify(&self) -> ProviderErrorKind {
        match self {
            Self::MissingApiKey => ProviderErrorKind::Auth,
            Self::HttpStatus { status, .. } if matches!(status, 401 | 403) => {
                ProviderErrorKind::Auth
            }
            Self::HttpStatus { status: 429, .. } => ProviderErrorKind::RateLimited,
            Self::HttpStatus { status, .. } if *status >= 500 => ProviderErrorKind::Transient,
            Self::HttpStatus { .. } => ProviderErrorKind::Invalid,
            Self::Http(error) if error.is_timeout() || error.is_connect() => {
                ProviderErrorKind::Transient
            }
            Self::Http(_) => ProviderErrorKind::Transient,
            Self::Serde(_) | Self::InvalidResponse(_) => ProviderErrorKind::Invalid,
        }
    }
}

#[async_trait]
/// Trait contract for `LlmClient` behavior.
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, AiError>;

    /// Stable label recorded in message metadata and pipeline results.
    fn provider_name(&self) -> &'static str;
}
