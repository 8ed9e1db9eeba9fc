//! End-to-end pipeline scenarios over the real SQLite store and knowledge
//! store, with a scripted provider and dry-run outbound delivery.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

use coral_ai::{AiError, ChatRequest, ChatResponse, ChatUsage, LlmClient};
use coral_channels::{
    ChannelCredentials, OutboundConfig, OutboundDispatcher, OutboundMode, Platform,
};
use coral_knowledge::{FileKnowledgeStore, KnowledgePassage};
use coral_pipeline::{
    InProcessConversationCache, LocalBroadcaster, MessagePipeline, PipelineConfig,
    ProcessMessageRequest, ProviderRegistry,
};
use coral_store::{
    AgentRecord, ChannelRecord, Conversation, ConversationStatus, ConversationStore,
    MessageSender, RecordStatus, SqliteStore,
};

struct ScriptedClient {
    responses: AsyncMutex<VecDeque<ChatResponse>>,
    requests: AsyncMutex<Vec<ChatRequest>>,
}

impl ScriptedClient {
    fn new(replies: &[&str]) -> Self {
        let responses = replies
            .iter()
            .map(|content| ChatResponse {
                content: content.to_string(),
                finish_reason: Some("stop".to_string()),
                usage: ChatUsage {
                    input_tokens: 12,
                    output_tokens: 6,
                    total_tokens: 18,
                },
                model: "scripted-model".to_string(),
            })
            .collect::<VecDeque<_>>();
        Self {
            responses: AsyncMutex::new(responses),
            requests: AsyncMutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, AiError> {
        self.requests.lock().await.push(request);
        let mut responses = self.responses.lock().await;
        responses
            .pop_front()
            .ok_or_else(|| AiError::InvalidResponse("scripted response queue exhausted".into()))
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

struct Fixture {
    _tempdir: tempfile::TempDir,
    store: Arc<SqliteStore>,
    llm: Arc<ScriptedClient>,
    pipeline: MessagePipeline,
}

fn build_fixture(replies: &[&str]) -> Fixture {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(SqliteStore::new(tempdir.path().join("coral.db")).expect("store"));

    store
        .insert_channel(&ChannelRecord {
            id: "channel-wa".to_string(),
            tenant_id: "tenant-1".to_string(),
            platform: Platform::Whatsapp,
            external_ref: "phone-1".to_string(),
            status: RecordStatus::Active,
            credentials: ChannelCredentials {
                access_token: Some("wa-token".to_string()),
                phone_number_id: Some("phone-1".to_string()),
                ..ChannelCredentials::default()
            },
            created_unix_ms: 1,
        })
        .expect("channel");
    store
        .insert_channel(&ChannelRecord {
            id: "channel-tg".to_string(),
            tenant_id: "tenant-1".to_string(),
            platform: Platform::Telegram,
            external_ref: "bot-1".to_string(),
            status: RecordStatus::Active,
            credentials: ChannelCredentials {
                bot_token: Some("123:abc".to_string()),
                ..ChannelCredentials::default()
            },
            created_unix_ms: 1,
        })
        .expect("channel");
    store
        .insert_agent(&AgentRecord {
            id: "agent-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            name: "Support".to_string(),
            status: RecordStatus::Active,
            persona: "You are Coral, the Acme support assistant.".to_string(),
            traits: vec!["helpful".to_string()],
            tone: "warm".to_string(),
            provider: "scripted".to_string(),
            model: "scripted-model".to_string(),
            temperature: Some(0.3),
            max_tokens: Some(256),
            document_scope: vec!["doc-returns".to_string()],
            created_unix_ms: 1,
        })
        .expect("agent");

    let knowledge =
        FileKnowledgeStore::open(tempdir.path().join("knowledge.jsonl")).expect("knowledge");
    knowledge
        .insert(KnowledgePassage {
            id: "p-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            document_id: "doc-returns".to_string(),
            text: "Returns are accepted within 30 days of purchase.".to_string(),
        })
        .expect("passage");

    let llm = Arc::new(ScriptedClient::new(replies));
    let mut providers = ProviderRegistry::new();
    providers.register("scripted", llm.clone());

    let pipeline = MessagePipeline::new(
        store.clone(),
        Arc::new(InProcessConversationCache::default()),
        Arc::new(knowledge),
        providers,
        Arc::new(LocalBroadcaster::default()),
        OutboundDispatcher::new(OutboundConfig {
            mode: OutboundMode::DryRun,
            ..OutboundConfig::default()
        })
        .expect("dispatcher"),
        PipelineConfig::default(),
    );

    Fixture {
        _tempdir: tempdir,
        store,
        llm,
        pipeline,
    }
}

fn whatsapp_payload(message_id: &str, text: &str) -> String {
    format!(
        r#"{{
  "entry": [
    {{
      "id": "1031",
      "changes": [
        {{
          "field": "messages",
          "value": {{
            "metadata": {{"phone_number_id": "phone-1"}},
            "contacts": [{{"profile": {{"name": "Ada"}}, "wa_id": "15551230000"}}],
            "messages": [
              {{
                "from": "15551230000",
                "id": "{message_id}",
                "timestamp": "1700000000",
                "type": "text",
                "text": {{"body": "{text}"}}
              }}
            ]
          }}
        }}
      ]
    }}
  ]
}}"#
    )
}

#[tokio::test]
async fn integration_whatsapp_exchange_persists_and_uses_retrieval() {
    let fixture = build_fixture(&["You can return items within 30 days."]);

    let results = fixture
        .pipeline
        .process_inbound(
            Platform::Whatsapp,
            &whatsapp_payload("wamid.1", "can I return a purchase within 30 days?"),
            None,
        )
        .await
        .expect("delivery");
    assert_eq!(results.len(), 1);
    assert!(results[0].is_success());

    // The provider saw the retrieved passage in the system prompt and
    // exactly one user turn for a fresh conversation.
    let requests = fixture.llm.requests.lock().await;
    let request = requests.first().expect("one request");
    assert_eq!(request.model, "scripted-model");
    assert_eq!(request.max_tokens, Some(256));
    assert_eq!(request.messages.len(), 2);
    assert!(request.messages[0]
        .content
        .contains("Returns are accepted within 30 days"));
    assert!(request.messages[0].content.contains("Name: Ada"));
    assert_eq!(
        request.messages[1].content,
        "can I return a purchase within 30 days?"
    );

    let conversation = fixture
        .store
        .find_active_conversation("channel-wa", "15551230000")
        .expect("lookup")
        .expect("conversation");
    let messages = fixture
        .store
        .recent_messages(&conversation.id, 10)
        .expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].sender, MessageSender::Customer);
    assert_eq!(messages[1].sender, MessageSender::Agent);
    assert!(messages[0].created_unix_ms <= messages[1].created_unix_ms);
}

#[tokio::test]
async fn integration_second_message_carries_the_dialogue_window() {
    let fixture = build_fixture(&["First reply.", "Second reply."]);

    fixture
        .pipeline
        .process_inbound(
            Platform::Whatsapp,
            &whatsapp_payload("wamid.1", "hello there"),
            None,
        )
        .await
        .expect("first delivery");
    fixture
        .pipeline
        .process_inbound(
            Platform::Whatsapp,
            &whatsapp_payload("wamid.2", "and a follow-up"),
            None,
        )
        .await
        .expect("second delivery");

    let requests = fixture.llm.requests.lock().await;
    assert_eq!(requests.len(), 2);
    // Second request: system + prior exchange + new turn.
    let second = &requests[1];
    assert_eq!(second.messages.len(), 4);
    assert_eq!(second.messages[1].content, "hello there");
    assert_eq!(second.messages[2].content, "First reply.");
    assert_eq!(second.messages[3].content, "and a follow-up");

    let conversation = fixture
        .store
        .find_active_conversation("channel-wa", "15551230000")
        .expect("lookup")
        .expect("conversation");
    assert_eq!(
        fixture
            .store
            .recent_messages(&conversation.id, 10)
            .expect("messages")
            .len(),
        4
    );
}

#[tokio::test]
async fn integration_resolved_conversation_spawns_a_fresh_one() {
    let fixture = build_fixture(&["Welcome back."]);

    // A previously resolved conversation exists for the same identity.
    fixture
        .store
        .insert_conversation(&Conversation {
            id: "conv-old".to_string(),
            tenant_id: "tenant-1".to_string(),
            channel_id: "channel-wa".to_string(),
            agent_id: "agent-1".to_string(),
            external_id: "15551230000".to_string(),
            status: ConversationStatus::Resolved,
            priority: "normal".to_string(),
            customer_name: None,
            customer_email: None,
            metadata: BTreeMap::new(),
            created_unix_ms: 10,
            updated_unix_ms: 10,
        })
        .expect("resolved row");

    let results = fixture
        .pipeline
        .process_inbound(
            Platform::Whatsapp,
            &whatsapp_payload("wamid.9", "hello again"),
            None,
        )
        .await
        .expect("delivery");
    assert!(results[0].is_success());

    let active = fixture
        .store
        .find_active_conversation("channel-wa", "15551230000")
        .expect("lookup")
        .expect("fresh active conversation");
    assert_ne!(active.id, "conv-old");
    assert_eq!(results[0].conversation_id.as_deref(), Some(active.id.as_str()));
}

#[tokio::test]
async fn integration_batch_over_sqlite_reports_partial_failure() {
    let fixture = build_fixture(&["r1", "r2", "r3", "r4"]);

    let make = |id: &str, sender: &str, text: &str| ProcessMessageRequest {
        platform: Platform::Telegram,
        external_message_id: id.to_string(),
        external_sender_id: sender.to_string(),
        external_channel_id: "bot-1".to_string(),
        text: text.to_string(),
    };
    let results = fixture
        .pipeline
        .process_batch(vec![
            make("1", "tg-user-1", "first"),
            make("2", "tg-user-2", "second"),
            make("3", "tg-user-3", ""),
            make("4", "tg-user-4", "fourth"),
            make("5", "tg-user-5", "fifth"),
        ])
        .await;

    assert_eq!(results.len(), 5);
    assert!(results[0].is_success());
    assert!(results[1].is_success());
    assert!(!results[2].is_success());
    assert!(results[3].is_success());
    assert!(results[4].is_success());

    // Four independent conversations were created; the malformed item made
    // none.
    for sender in ["tg-user-1", "tg-user-2", "tg-user-4", "tg-user-5"] {
        assert!(fixture
            .store
            .find_active_conversation("channel-tg", sender)
            .expect("lookup")
            .is_some());
    }
    assert!(fixture
        .store
        .find_active_conversation("channel-tg", "tg-user-3")
        .expect("lookup")
        .is_none());
}
