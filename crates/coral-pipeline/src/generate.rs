//! Response generation over the configured provider.
//!
//! Providers are interchangeable behind `LlmClient` and chosen per agent by
//! configuration tag. No retry happens at this layer; bounded retry policy
//! lives inside the provider clients.

use std::collections::HashMap;
use std::sync::Arc;

use coral_ai::{ChatMessage, ChatRequest, LlmClient};

use crate::context::MessageContext;
use crate::error::PipelineError;
use crate::memory::MemoryRole;

#[derive(Debug, Clone)]
/// Public struct `GenerationDefaults` used across Coral components.
///
/// Fallbacks applied when agent configuration leaves a setting unset.
pub struct GenerationDefaults {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

/// Provider lookup by configuration tag.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, client: Arc<dyn LlmClient>) {
        self.providers.insert(name.into(), client);
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn LlmClient>, PipelineError> {
        self.providers
            .get(name.trim())
            .cloned()
            .ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "no provider registered under '{}'",
                    name.trim()
                ))
            })
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Public struct `GeneratedReply` used across Coral components.
pub struct GeneratedReply {
    pub content: String,
    pub tokens_used: u64,
    pub model: String,
    pub provider: String,
}

/// Public struct `ResponseGenerator` used across Coral components.
pub struct ResponseGenerator {
    registry: ProviderRegistry,
    defaults: GenerationDefaults,
}

impl ResponseGenerator {
    pub fn new(registry: ProviderRegistry, defaults: GenerationDefaults) -> Self {
        Self { registry, defaults }
    }

    pub async fn generate(
        &self,
        context: &MessageContext,
    ) -> Result<GeneratedReply, PipelineError> {
        let client = self.registry.resolve(&context.agent.provider)?;
        let request = self.build_request(context);
        let request_model = request.model.clone();

        let response = client.complete(request).await.map_err(|error| {
            PipelineError::Provider {
                kind: error.classify(),
                message: error.to_string(),
            }
        })?;

        let model = if response.model.trim().is_empty() {
            request_model
        } else {
            response.model
        };

        Ok(GeneratedReply {
            content: response.content,
            tokens_used: response.usage.total_tokens,
            model,
            provider: client.provider_name().to_string(),
        })
    }

    /// System prompt, then the trailing window oldest-first, then the new
    /// user turn.
    fn build_request(&self, context: &MessageContext) -> ChatRequest {
        let mut messages = Vec::with_capacity(context.history.len() + 2);
        messages.push(ChatMessage::system(context.system_prompt.clone()));
        for turn in &context.history {
            messages.push(match turn.role {
                MemoryRole::User => ChatMessage::user(turn.content.clone()),
                MemoryRole::Assistant => ChatMessage::assistant(turn.content.clone()),
                MemoryRole::System => ChatMessage::system(turn.content.clone()),
            });
        }
        messages.push(ChatMessage::user(context.user_text.clone()));

        let model = if context.agent.model.trim().is_empty() {
            self.defaults.model.clone()
        } else {
            context.agent.model.clone()
        };

        ChatRequest {
            model,
            messages,
            max_tokens: Some(
                context.agent.max_tokens.unwrap_or(self.defaults.max_tokens),
            ),
            temperature: Some(
                context
                    .agent
                    .temperature
                    .unwrap_or(self.defaults.temperature),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use coral_ai::{
        AiError, ChatRequest, ChatResponse, ChatUsage, LlmClient, MessageRole, ProviderErrorKind,
    };
    use coral_store::{AgentRecord, RecordStatus};

    use super::{GenerationDefaults, ProviderRegistry, ResponseGenerator};
    use crate::context::MessageContext;
    use crate::error::PipelineError;
    use crate::memory::MemoryTurn;

    struct RecordingLlm {
        requests: Mutex<Vec<ChatRequest>>,
        reply: String,
    }

    impl RecordingLlm {
        fn new(reply: &str) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                reply: reply.to_string(),
            }
        }
    }

    #[async_trait]
    impl LlmClient for RecordingLlm {
        async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, AiError> {
            self.requests.lock().expect("lock").push(request);
            Ok(ChatResponse {
                content: self.reply.clone(),
                finish_reason: Some("stop".to_string()),
                usage: ChatUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                    total_tokens: 15,
                },
                model: String::new(),
            })
        }

        fn provider_name(&self) -> &'static str {
            "fake"
        }
    }

    struct RateLimitedLlm;

    #[async_trait]
    impl LlmClient for RateLimitedLlm {
        async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, AiError> {
            Err(AiError::HttpStatus {
                status: 429,
                body: "slow down".to_string(),
            })
        }

        fn provider_name(&self) -> &'static str {
            "fake"
        }
    }

    fn sample_agent(provider: &str) -> AgentRecord {
        AgentRecord {
            id: "agent-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            name: "Support".to_string(),
            status: RecordStatus::Active,
            persona: "persona".to_string(),
            traits: Vec::new(),
            tone: String::new(),
            provider: provider.to_string(),
            model: "test-model".to_string(),
            temperature: None,
            max_tokens: None,
            document_scope: Vec::new(),
            created_unix_ms: 1,
        }
    }

    fn sample_context(provider: &str) -> MessageContext {
        MessageContext {
            conversation_id: "conv-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            agent: sample_agent(provider),
            system_prompt: "system prompt".to_string(),
            history: vec![
                MemoryTurn::user("earlier question"),
                MemoryTurn::assistant("earlier answer"),
            ],
            user_text: "new question".to_string(),
            passage_count: 0,
        }
    }

    fn registry_with(client: Arc<dyn LlmClient>) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register("fake", client);
        registry
    }

    #[tokio::test]
    async fn functional_request_orders_system_history_then_new_turn() {
        let llm = Arc::new(RecordingLlm::new("the answer"));
        let generator = ResponseGenerator::new(
            registry_with(llm.clone()),
            GenerationDefaults::default(),
        );

        let reply = generator
            .generate(&sample_context("fake"))
            .await
            .expect("generate");
        assert_eq!(reply.content, "the answer");
        assert_eq!(reply.tokens_used, 15);
        assert_eq!(reply.provider, "fake");
        // Empty response model falls back to the request model.
        assert_eq!(reply.model, "test-model");

        let requests = llm.requests.lock().expect("lock");
        let request = requests.first().expect("one request");
        let roles = request
            .messages
            .iter()
            .map(|message| message.role)
            .collect::<Vec<_>>();
        assert_eq!(
            roles,
            vec![
                MessageRole::System,
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::User,
            ]
        );
        assert_eq!(request.messages[0].content, "system prompt");
        assert_eq!(request.messages[3].content, "new question");
        // Unset agent settings fall back to the configured defaults.
        assert_eq!(request.max_tokens, Some(1024));
        assert_eq!(request.temperature, Some(0.7));
    }

    #[tokio::test]
    async fn unit_unknown_provider_tag_is_a_configuration_error() {
        let generator = ResponseGenerator::new(
            registry_with(Arc::new(RecordingLlm::new("unused"))),
            GenerationDefaults::default(),
        );

        let error = generator
            .generate(&sample_context("missing-provider"))
            .await
            .expect_err("unknown provider");
        assert!(matches!(error, PipelineError::Configuration(_)));
    }

    #[tokio::test]
    async fn functional_provider_errors_are_classified_and_surfaced() {
        let generator = ResponseGenerator::new(
            registry_with(Arc::new(RateLimitedLlm)),
            GenerationDefaults::default(),
        );

        let error = generator
            .generate(&sample_context("fake"))
            .await
            .expect_err("rate limited");
        match error {
            PipelineError::Provider { kind, .. } => {
                assert_eq!(kind, ProviderErrorKind::RateLimited);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
