//! Language-model provider abstraction for Coral.
mod anthropic;
mod openai;
mod retry;
mod types;

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use openai::{OpenAiClient, OpenAiConfig};
pub use types::{
    AiError, ChatMessage, ChatRequest, ChatResponse, ChatUsage, LlmClient, MessageRole,
    ProviderErrorKind,
};
