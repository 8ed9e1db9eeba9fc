//! The inbound processing façade.
//!
//! One `MessagePipeline` instance owns the full stage chain for a process:
//! verification, normalization, resolution, context assembly, generation,
//! persistence, fan-out, and outbound delivery. Collaborators are injected
//! at construction so tests substitute fakes without global state.
//!
//! Ordering invariant: the customer row is written before generation and the
//! agent row only after a successful generation, so a crash in between loses
//! at most the AI reply and never duplicates the user's input. Failures at
//! or after persistence never flip a run's result to failure; failures
//! before persistence abort only that message.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use coral_channels::{
    normalize_webhook_payload, validate_inbound_message, verify_webhook_signature,
    InboundMessage, OutboundDispatcher, Platform,
};
use coral_core::{current_unix_timestamp_ms, new_event_id, new_message_id};
use coral_knowledge::KnowledgeSearch;
use coral_store::{Conversation, ConversationStore, MessageRecord, MessageSender};

use crate::broadcast::{Broadcaster, ConversationEvent, ConversationEventKind};
use crate::context::{ContextAssembler, ContextConfig};
use crate::error::{PipelineError, PROVIDER_FAILURE_REPLY};
use crate::generate::{GenerationDefaults, ProviderRegistry, ResponseGenerator};
use crate::memory::{ConversationCache, MemoryTurn};
use crate::resolver::{ConversationResolver, ResolvedConversation};

const EVENT_PREVIEW_MAX_CHARS: usize = 120;

#[derive(Debug, Clone, Default)]
/// Public struct `PipelineConfig` used across Coral components.
pub struct PipelineConfig {
    /// Per-platform webhook app secrets for signature verification. A
    /// platform without an entry skips enforcement.
    pub webhook_secrets: BTreeMap<Platform, String>,
    pub context: ContextConfig,
    pub defaults: GenerationDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `ProcessedError` used across Coral components.
pub struct ProcessedError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `ProcessedMessage` used across Coral components.
///
/// The per-message result returned to webhook handlers and batch drivers;
/// never persisted.
pub struct ProcessedMessage {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub content: String,
    pub sender: MessageSender,
    pub tokens_used: u64,
    pub processing_time_ms: u64,
    #[serde(default)]
    pub error: Option<ProcessedError>,
}

impl ProcessedMessage {
    fn failure(
        code: impl Into<String>,
        message: impl Into<String>,
        content: impl Into<String>,
        conversation_id: Option<String>,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            message_id: None,
            conversation_id,
            content: content.into(),
            sender: MessageSender::System,
            tokens_used: 0,
            processing_time_ms,
            error: Some(ProcessedError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `ProcessMessageRequest` used across Coral components.
pub struct ProcessMessageRequest {
    pub platform: Platform,
    pub external_message_id: String,
    pub external_sender_id: String,
    pub external_channel_id: String,
    pub text: String,
}

/// Public struct `MessagePipeline` used across Coral components.
pub struct MessagePipeline {
    store: Arc<dyn ConversationStore>,
    cache: Arc<dyn ConversationCache>,
    resolver: ConversationResolver,
    assembler: ContextAssembler,
    generator: ResponseGenerator,
    broadcaster: Arc<dyn Broadcaster>,
    outbound: OutboundDispatcher,
    webhook_secrets: BTreeMap<Platform, String>,
}

impl MessagePipeline {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        cache: Arc<dyn ConversationCache>,
        knowledge: Arc<dyn KnowledgeSearch>,
        providers: ProviderRegistry,
        broadcaster: Arc<dyn Broadcaster>,
        outbound: OutboundDispatcher,
        config: PipelineConfig,
    ) -> Self {
        let resolver = ConversationResolver::new(Arc::clone(&store));
        let assembler = ContextAssembler::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            knowledge,
            config.context,
        );
        let generator = ResponseGenerator::new(providers, config.defaults);

        Self {
            store,
            cache,
            resolver,
            assembler,
            generator,
            broadcaster,
            outbound,
            webhook_secrets: config.webhook_secrets,
        }
    }

    /// Processes one webhook delivery end to end.
    ///
    /// A failed signature check is terminal for the whole call; after
    /// normalization each item is processed independently and failures are
    /// captured per item.
    pub async fn process_inbound(
        &self,
        platform: Platform,
        raw_payload: &str,
        signature: Option<&str>,
    ) -> Result<Vec<ProcessedMessage>, PipelineError> {
        let secret = self.webhook_secrets.get(&platform).map(String::as_str);
        if !verify_webhook_signature(platform, raw_payload.as_bytes(), signature, secret) {
            return Err(PipelineError::Authentication { platform });
        }

        let items = normalize_webhook_payload(platform, raw_payload)?;
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Ok(inbound) => results.push(self.run_message(&inbound).await),
                Err(error) => {
                    tracing::warn!(
                        platform = platform.as_str(),
                        code = error.code.as_str(),
                        "skipping unparseable webhook item: {}",
                        error.message
                    );
                    results.push(ProcessedMessage::failure(
                        error.code.as_str(),
                        error.to_string(),
                        "",
                        None,
                        0,
                    ));
                }
            }
        }
        Ok(results)
    }

    /// Processes a batch of canonical requests sequentially with independent
    /// failure capture per item.
    pub async fn process_batch(
        &self,
        requests: Vec<ProcessMessageRequest>,
    ) -> Vec<ProcessedMessage> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.run_request(request).await);
        }
        results
    }

    async fn run_request(&self, request: ProcessMessageRequest) -> ProcessedMessage {
        let inbound = InboundMessage {
            platform: request.platform,
            external_message_id: request.external_message_id,
            external_sender_id: request.external_sender_id,
            external_channel_id: request.external_channel_id,
            text: request.text,
            attachments: Vec::new(),
            received_unix_ms: current_unix_timestamp_ms(),
            metadata: BTreeMap::new(),
        };
        if let Err(error) = validate_inbound_message(&inbound) {
            return ProcessedMessage::failure("invalid_message", error.to_string(), "", None, 0);
        }
        self.run_message(&inbound).await
    }

    async fn run_message(&self, inbound: &InboundMessage) -> ProcessedMessage {
        let started = Instant::now();
        match self.process_message(inbound, &started).await {
            Ok(result) => result,
            Err(error) => {
                tracing::warn!(
                    platform = inbound.platform.as_str(),
                    external_message_id = %inbound.external_message_id,
                    code = error.code(),
                    "message processing failed: {error}"
                );
                let (message, content) = if error.is_provider_failure() {
                    // User-safe generic text; the detail stays in the log.
                    (PROVIDER_FAILURE_REPLY.to_string(), PROVIDER_FAILURE_REPLY)
                } else {
                    (error.to_string(), "")
                };
                ProcessedMessage::failure(
                    error.code(),
                    message,
                    content,
                    None,
                    elapsed_ms(&started),
                )
            }
        }
    }

    async fn process_message(
        &self,
        inbound: &InboundMessage,
        started: &Instant,
    ) -> Result<ProcessedMessage, PipelineError> {
        let ResolvedConversation {
            conversation,
            channel,
            ..
        } = self.resolver.resolve(inbound)?;

        if self
            .cache
            .seen_external_message(&conversation.id, &inbound.external_message_id)
            .await
        {
            tracing::debug!(
                conversation_id = %conversation.id,
                external_message_id = %inbound.external_message_id,
                "duplicate delivery short-circuited"
            );
            return Ok(ProcessedMessage::failure(
                "duplicate_message",
                format!(
                    "external message '{}' was already processed",
                    inbound.external_message_id
                ),
                "",
                Some(conversation.id),
                elapsed_ms(started),
            ));
        }

        // Context is assembled before the customer row is written so a cold
        // window rebuild never double-counts the new turn; the row itself
        // still lands before generation, so a crash between the two loses at
        // most the AI reply.
        let context = self
            .assembler
            .build_context(&conversation, &inbound.text)
            .await?;
        let customer_message = self.persist_customer_message(inbound, &conversation)?;

        let reply = self.generator.generate(&context).await?;

        let agent_now = current_unix_timestamp_ms().max(customer_message.created_unix_ms);
        let mut metadata = BTreeMap::new();
        metadata.insert("model".to_string(), Value::String(reply.model.clone()));
        metadata.insert(
            "provider".to_string(),
            Value::String(reply.provider.clone()),
        );
        metadata.insert("tokens_used".to_string(), json!(reply.tokens_used));
        let agent_message = MessageRecord {
            id: new_message_id(),
            conversation_id: conversation.id.clone(),
            content: reply.content.clone(),
            sender: MessageSender::Agent,
            metadata,
            created_unix_ms: agent_now,
        };
        self.store.insert_message(&agent_message)?;
        self.store.touch_conversation(&conversation.id, agent_now)?;

        self.cache
            .append_exchange(
                &conversation.id,
                MemoryTurn::user(inbound.text.clone()),
                MemoryTurn::assistant(reply.content.clone()),
            )
            .await;
        self.cache
            .mark_external_message(&conversation.id, &inbound.external_message_id)
            .await;

        self.publish_events(&conversation, &agent_message).await;

        if let Err(error) = self
            .outbound
            .send_reply(
                inbound.platform,
                &inbound.external_sender_id,
                &reply.content,
                &channel.credentials,
            )
            .await
        {
            // The reply is durably stored; delivery failure is recoverable
            // and must not fail the run.
            tracing::warn!(
                conversation_id = %conversation.id,
                reason_code = %error.reason_code,
                retryable = error.retryable,
                "outbound delivery failed: {}",
                error.detail
            );
        }

        Ok(ProcessedMessage {
            message_id: Some(agent_message.id),
            conversation_id: Some(conversation.id),
            content: reply.content,
            sender: MessageSender::Agent,
            tokens_used: reply.tokens_used,
            processing_time_ms: elapsed_ms(started),
            error: None,
        })
    }

    fn persist_customer_message(
        &self,
        inbound: &InboundMessage,
        conversation: &Conversation,
    ) -> Result<MessageRecord, PipelineError> {
        let now = current_unix_timestamp_ms();
        let mut metadata = BTreeMap::new();
        metadata.insert(
            "platform".to_string(),
            Value::String(inbound.platform.as_str().to_string()),
        );
        metadata.insert(
            "external_message_id".to_string(),
            Value::String(inbound.external_message_id.clone()),
        );
        if !inbound.attachments.is_empty() {
            metadata.insert(
                "attachment_count".to_string(),
                json!(inbound.attachments.len()),
            );
        }

        let message = MessageRecord {
            id: new_message_id(),
            conversation_id: conversation.id.clone(),
            content: inbound.text.clone(),
            sender: MessageSender::Customer,
            metadata,
            created_unix_ms: now,
        };
        self.store.insert_message(&message)?;
        self.store.touch_conversation(&conversation.id, now)?;
        Ok(message)
    }

    async fn publish_events(&self, conversation: &Conversation, agent_message: &MessageRecord) {
        let preview = preview_text(&agent_message.content);
        let events = [
            ConversationEvent {
                event_id: new_event_id(),
                tenant_id: conversation.tenant_id.clone(),
                kind: ConversationEventKind::MessageCreated,
                conversation_id: conversation.id.clone(),
                message_id: Some(agent_message.id.clone()),
                sender: Some(agent_message.sender.as_str().to_string()),
                preview: preview.clone(),
                emitted_unix_ms: current_unix_timestamp_ms(),
            },
            ConversationEvent {
                event_id: new_event_id(),
                tenant_id: conversation.tenant_id.clone(),
                kind: ConversationEventKind::ConversationNotification,
                conversation_id: conversation.id.clone(),
                message_id: None,
                sender: None,
                preview,
                emitted_unix_ms: current_unix_timestamp_ms(),
            },
        ];

        for event in events {
            let kind = event.kind;
            if let Err(error) = self.broadcaster.publish(event).await {
                // The exchange is already durable; fan-out is best-effort.
                tracing::warn!(
                    conversation_id = %conversation.id,
                    kind = kind.as_str(),
                    "broadcast publish failed: {error}"
                );
            }
        }
    }
}

fn preview_text(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= EVENT_PREVIEW_MAX_CHARS {
        return trimmed.to_string();
    }
    trimmed.chars().take(EVENT_PREVIEW_MAX_CHARS).collect()
}

fn elapsed_ms(started: &Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
