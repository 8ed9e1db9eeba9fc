//! Model context assembly.
//!
//! Builds the system prompt and bounded dialogue window for one generation
//! call. Prompt composition is deterministic: given identical agent
//! configuration, history, and retrieval results the output is
//! byte-identical, which response reproducibility tests rely on.

use std::sync::Arc;

use coral_knowledge::{KnowledgeMatch, KnowledgeSearch};
use coral_store::{AgentRecord, Conversation, ConversationStore, MessageSender};

use crate::error::PipelineError;
use crate::memory::{
    trim_window, ConversationCache, MemoryRole, MemoryTurn, WindowLimits,
};

/// Fixed behavioral suffix appended to every system prompt.
const BEHAVIORAL_GUIDELINES: &str = "Guidelines:\n\
- Answer using the conversation and the provided knowledge when relevant.\n\
- If you do not know the answer, say so instead of guessing.\n\
- Stay concise and keep replies suitable for a chat conversation.";

#[derive(Debug, Clone)]
/// Public struct `ContextConfig` used across Coral components.
pub struct ContextConfig {
    pub window_limits: WindowLimits,
    pub retrieval_top_k: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            window_limits: WindowLimits::default(),
            retrieval_top_k: 4,
        }
    }
}

#[derive(Debug, Clone)]
/// Public struct `MessageContext` used across Coral components.
pub struct MessageContext {
    pub conversation_id: String,
    pub tenant_id: String,
    pub agent: AgentRecord,
    pub system_prompt: String,
    /// Oldest-first dialogue window, excluding the new user turn.
    pub history: Vec<MemoryTurn>,
    pub user_text: String,
    pub passage_count: usize,
}

/// Public struct `ContextAssembler` used across Coral components.
pub struct ContextAssembler {
    store: Arc<dyn ConversationStore>,
    cache: Arc<dyn ConversationCache>,
    knowledge: Arc<dyn KnowledgeSearch>,
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        cache: Arc<dyn ConversationCache>,
        knowledge: Arc<dyn KnowledgeSearch>,
        config: ContextConfig,
    ) -> Self {
        Self {
            store,
            cache,
            knowledge,
            config,
        }
    }

    pub async fn build_context(
        &self,
        conversation: &Conversation,
        new_message_text: &str,
    ) -> Result<MessageContext, PipelineError> {
        let agent = self
            .store
            .agent_by_id(&conversation.agent_id)?
            .ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "agent '{}' referenced by conversation '{}' does not exist",
                    conversation.agent_id, conversation.id
                ))
            })?;

        let history = self.load_window(conversation).await?;
        let passages = self.retrieve_passages(conversation, &agent, new_message_text).await;
        let system_prompt = compose_system_prompt(
            &agent,
            conversation.customer_name.as_deref(),
            conversation.customer_email.as_deref(),
            &passages,
        );

        Ok(MessageContext {
            conversation_id: conversation.id.clone(),
            tenant_id: conversation.tenant_id.clone(),
            agent,
            system_prompt,
            history,
            user_text: new_message_text.to_string(),
            passage_count: passages.len(),
        })
    }

    async fn load_window(
        &self,
        conversation: &Conversation,
    ) -> Result<Vec<MemoryTurn>, PipelineError> {
        if let Some(window) = self.cache.window(&conversation.id).await {
            return Ok(window);
        }

        // Cold start: rebuild the window from durable rows and seed the
        // cache with the result.
        let mut turns = self
            .store
            .recent_messages(&conversation.id, self.config.window_limits.max_turns)?
            .into_iter()
            .map(|message| MemoryTurn {
                role: match message.sender {
                    MessageSender::Customer => MemoryRole::User,
                    MessageSender::Agent => MemoryRole::Assistant,
                    MessageSender::System => MemoryRole::System,
                },
                content: message.content,
            })
            .collect::<Vec<_>>();
        trim_window(&mut turns, &self.config.window_limits);
        self.cache
            .replace_window(&conversation.id, turns.clone())
            .await;
        Ok(turns)
    }

    async fn retrieve_passages(
        &self,
        conversation: &Conversation,
        agent: &AgentRecord,
        query: &str,
    ) -> Vec<KnowledgeMatch> {
        match self
            .knowledge
            .search(
                &conversation.tenant_id,
                query,
                self.config.retrieval_top_k,
                &agent.document_scope,
            )
            .await
        {
            Ok(matches) => matches,
            Err(error) => {
                // Retrieval is an enrichment; its failure must not fail the
                // pipeline.
                tracing::warn!(
                    conversation_id = %conversation.id,
                    error = %error,
                    "knowledge retrieval failed, continuing without passages"
                );
                Vec::new()
            }
        }
    }
}

/// Composes the system prompt. Section order is part of the contract:
/// persona, style annotations, customer info, retrieved passages, fixed
/// guidelines.
pub fn compose_system_prompt(
    agent: &AgentRecord,
    customer_name: Option<&str>,
    customer_email: Option<&str>,
    passages: &[KnowledgeMatch],
) -> String {
    let mut sections = Vec::new();

    let persona = agent.persona.trim();
    if !persona.is_empty() {
        sections.push(persona.to_string());
    }

    let mut annotations = Vec::new();
    let traits = agent
        .traits
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .collect::<Vec<_>>();
    if !traits.is_empty() {
        annotations.push(format!("Traits: {}.", traits.join(", ")));
    }
    let tone = agent.tone.trim();
    if !tone.is_empty() {
        annotations.push(format!("Tone: {tone}."));
    }
    if !annotations.is_empty() {
        sections.push(annotations.join("\n"));
    }

    let mut customer_lines = Vec::new();
    if let Some(name) = customer_name.map(str::trim).filter(|value| !value.is_empty()) {
        customer_lines.push(format!("- Name: {name}"));
    }
    if let Some(email) = customer_email.map(str::trim).filter(|value| !value.is_empty()) {
        customer_lines.push(format!("- Email: {email}"));
    }
    if !customer_lines.is_empty() {
        sections.push(format!(
            "Customer information:\n{}",
            customer_lines.join("\n")
        ));
    }

    if !passages.is_empty() {
        let lines = passages
            .iter()
            .enumerate()
            .map(|(index, passage)| format!("{}. {}", index + 1, passage.text.trim()))
            .collect::<Vec<_>>();
        sections.push(format!("Relevant knowledge:\n{}", lines.join("\n")));
    }

    sections.push(BEHAVIORAL_GUIDELINES.to_string());
    sections.join("\n\n")
}
