use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::net::TcpListener;

use coral_ai::{AiError, ChatRequest, ChatResponse, ChatUsage, LlmClient};
use coral_channels::{
    ChannelCredentials, OutboundConfig, OutboundDispatcher, OutboundMode, Platform,
};
use coral_knowledge::{KnowledgeMatch, KnowledgeSearch};
use coral_pipeline::{
    InProcessConversationCache, LocalBroadcaster, MessagePipeline, PipelineConfig,
    ProviderRegistry,
};
use coral_store::{AgentRecord, ChannelRecord, ConversationStore, MemoryStore, RecordStatus};

use super::{build_webhook_router, GatewayConfig, GatewayState};

const WEBHOOK_SECRET: &str = "app-secret";

struct CannedLlm;

#[async_trait]
impl LlmClient for CannedLlm {
    async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, AiError> {
        Ok(ChatResponse {
            content: "canned reply".to_string(),
            finish_reason: Some("stop".to_string()),
            usage: ChatUsage::default(),
            model: "fake-model".to_string(),
        })
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

struct EmptyKnowledge;

#[async_trait]
impl KnowledgeSearch for EmptyKnowledge {
    async fn search(
        &self,
        _tenant_id: &str,
        _query: &str,
        _k: usize,
        _document_scope: &[String],
    ) -> Result<Vec<KnowledgeMatch>> {
        Ok(Vec::new())
    }
}

fn seeded_pipeline() -> Arc<MessagePipeline> {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_channel(&ChannelRecord {
            id: "channel-1".to_string(),
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
        .insert_agent(&AgentRecord {
            id: "agent-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            name: "Support".to_string(),
            status: RecordStatus::Active,
            persona: "You help customers.".to_string(),
            traits: Vec::new(),
            tone: String::new(),
            provider: "fake".to_string(),
            model: "fake-model".to_string(),
            temperature: None,
            max_tokens: None,
            document_scope: Vec::new(),
            created_unix_ms: 1,
        })
        .expect("agent");

    let mut providers = ProviderRegistry::new();
    providers.register("fake", Arc::new(CannedLlm));

    let mut webhook_secrets = BTreeMap::new();
    webhook_secrets.insert(Platform::Whatsapp, WEBHOOK_SECRET.to_string());

    Arc::new(MessagePipeline::new(
        store,
        Arc::new(InProcessConversationCache::default()),
        Arc::new(EmptyKnowledge),
        providers,
        Arc::new(LocalBroadcaster::default()),
        OutboundDispatcher::new(OutboundConfig {
            mode: OutboundMode::DryRun,
            ..OutboundConfig::default()
        })
        .expect("dispatcher"),
        PipelineConfig {
            webhook_secrets,
            ..PipelineConfig::default()
        },
    ))
}

async fn spawn_gateway(config: GatewayConfig) -> String {
    let state = Arc::new(GatewayState {
        pipeline: seeded_pipeline(),
        config,
    });
    let app = build_webhook_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{address}")
}

fn verify_config() -> GatewayConfig {
    let mut meta_verify_tokens = BTreeMap::new();
    meta_verify_tokens.insert(Platform::Whatsapp, "verify-me".to_string());
    GatewayConfig {
        meta_verify_tokens,
        telegram_webhook_secret: Some("tg-secret".to_string()),
    }
}

fn sign(payload: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).expect("hmac");
    mac.update(payload.as_bytes());
    let hex = mac
        .finalize()
        .into_bytes()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    format!("sha256={hex}")
}

fn whatsapp_payload() -> String {
    r#"{
  "entry": [
    {
      "id": "1031",
      "changes": [
        {
          "field": "messages",
          "value": {
            "metadata": {"phone_number_id": "phone-1"},
            "messages": [
              {"from": "15551230000", "id": "wamid.1", "timestamp": "1700000000", "type": "text", "text": {"body": "Hi"}}
            ]
          }
        }
      ]
    }
  ]
}"#
    .to_string()
}

#[tokio::test]
async fn integration_health_endpoint_responds_ok() {
    let base = spawn_gateway(GatewayConfig::default()).await;
    let response = reqwest::get(format!("{base}/healthz")).await.expect("get");
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn integration_meta_verification_echoes_the_challenge() {
    let base = spawn_gateway(verify_config()).await;
    let response = reqwest::get(format!(
        "{base}/webhooks/whatsapp?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=12345"
    ))
    .await
    .expect("get");
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.expect("body"), "12345");
}

#[tokio::test]
async fn integration_meta_verification_rejects_wrong_token() {
    let base = spawn_gateway(verify_config()).await;
    let response = reqwest::get(format!(
        "{base}/webhooks/whatsapp?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=12345"
    ))
    .await
    .expect("get");
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn integration_signed_whatsapp_delivery_is_accepted() {
    let base = spawn_gateway(GatewayConfig::default()).await;
    let payload = whatsapp_payload();
    let response = reqwest::Client::new()
        .post(format!("{base}/webhooks/whatsapp"))
        .header("x-hub-signature-256", sign(&payload))
        .body(payload)
        .send()
        .await
        .expect("post");

    assert_eq!(response.status().as_u16(), 200);
    let body = response.json::<serde_json::Value>().await.expect("json");
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["processed"], 1);
    assert_eq!(body["failed"], 0);
}

#[tokio::test]
async fn integration_forged_signature_is_rejected_with_401() {
    let base = spawn_gateway(GatewayConfig::default()).await;
    let response = reqwest::Client::new()
        .post(format!("{base}/webhooks/whatsapp"))
        .header("x-hub-signature-256", "sha256=deadbeef")
        .body(whatsapp_payload())
        .send()
        .await
        .expect("post");

    assert_eq!(response.status().as_u16(), 401);
    let body = response.json::<serde_json::Value>().await.expect("json");
    assert_eq!(body["error"]["code"], "invalid_signature");
}

#[tokio::test]
async fn integration_telegram_secret_header_is_enforced_when_configured() {
    let base = spawn_gateway(verify_config()).await;
    let payload = r#"{"update_id": 1, "callback_query": {"id": "cb"}}"#;

    let denied = reqwest::Client::new()
        .post(format!("{base}/webhooks/telegram"))
        .body(payload)
        .send()
        .await
        .expect("post");
    assert_eq!(denied.status().as_u16(), 401);

    let accepted = reqwest::Client::new()
        .post(format!("{base}/webhooks/telegram"))
        .header("x-telegram-bot-api-secret-token", "tg-secret")
        .body(payload)
        .send()
        .await
        .expect("post");
    assert_eq!(accepted.status().as_u16(), 200);
}

#[tokio::test]
async fn regression_unparseable_body_returns_400_with_reason_code() {
    let base = spawn_gateway(GatewayConfig::default()).await;
    let body = "{not json";
    let response = reqwest::Client::new()
        .post(format!("{base}/webhooks/whatsapp"))
        .header("x-hub-signature-256", sign(body))
        .body(body)
        .send()
        .await
        .expect("post");

    assert_eq!(response.status().as_u16(), 400);
    let body = response.json::<serde_json::Value>().await.expect("json");
    assert_eq!(body["error"]["code"], "invalid_json");
}
