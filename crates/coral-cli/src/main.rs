//! `coral` binary: configuration loading, collaborator wiring, and the
//! webhook gateway server.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use coral_ai::{AnthropicClient, AnthropicConfig, OpenAiClient, OpenAiConfig};
use coral_channels::{OutboundConfig, OutboundDispatcher};
use coral_gateway::{serve_gateway, GatewayConfig, GatewayState};
use coral_knowledge::FileKnowledgeStore;
use coral_pipeline::{
    ContextConfig, GenerationDefaults, InProcessConversationCache, LocalBroadcaster,
    MessagePipeline, PipelineConfig, ProviderRegistry, WindowLimits,
};
use coral_store::SqliteStore;

use crate::config::{
    load_config, CoralConfig, ANTHROPIC_API_KEY_ENV, OPENAI_API_KEY_ENV,
};

#[derive(Debug, Parser)]
#[command(name = "coral", about = "Coral inbound message processing gateway")]
struct CliArgs {
    /// Path to the TOML configuration file.
    #[arg(long, env = "CORAL_CONFIG", default_value = "coral.toml")]
    config: PathBuf,

    /// Override the configured bind address.
    #[arg(long)]
    bind: Option<String>,
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn build_provider_registry(config: &CoralConfig) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();

    if let Some(entry) = &config.providers.openai {
        let api_key = entry
            .resolve_api_key(OPENAI_API_KEY_ENV)
            .with_context(|| {
                format!("openai provider configured without api key (set {OPENAI_API_KEY_ENV})")
            })?;
        let mut client_config = OpenAiConfig {
            api_key,
            ..OpenAiConfig::default()
        };
        if let Some(api_base) = entry.api_base.as_deref() {
            client_config.api_base = api_base.to_string();
        }
        let client = OpenAiClient::new(client_config).context("failed to build openai client")?;
        registry.register("openai", Arc::new(client));
    }

    if let Some(entry) = &config.providers.anthropic {
        let api_key = entry
            .resolve_api_key(ANTHROPIC_API_KEY_ENV)
            .with_context(|| {
                format!(
                    "anthropic provider configured without api key (set {ANTHROPIC_API_KEY_ENV})"
                )
            })?;
        let mut client_config = AnthropicConfig {
            api_key,
            ..AnthropicConfig::default()
        };
        if let Some(api_base) = entry.api_base.as_deref() {
            client_config.api_base = api_base.to_string();
        }
        let client =
            AnthropicClient::new(client_config).context("failed to build anthropic client")?;
        registry.register("anthropic", Arc::new(client));
    }

    if registry.is_empty() {
        bail!("no language-model provider configured (add [providers.openai] or [providers.anthropic])");
    }

    Ok(registry)
}

fn build_pipeline(config: &CoralConfig) -> Result<MessagePipeline> {
    let store = SqliteStore::new(&config.store.path)
        .with_context(|| format!("failed to open store at {}", config.store.path.display()))?;
    let knowledge = FileKnowledgeStore::open(&config.knowledge.path).with_context(|| {
        format!(
            "failed to open knowledge store at {}",
            config.knowledge.path.display()
        )
    })?;
    let providers = build_provider_registry(config)?;
    let outbound = OutboundDispatcher::new(OutboundConfig {
        mode: config.outbound.parse_mode()?,
        http_timeout_ms: config.outbound.http_timeout_ms,
        ..OutboundConfig::default()
    })
    .context("failed to build outbound dispatcher")?;

    let window_limits = WindowLimits {
        max_turns: config.pipeline.window_max_turns,
        max_tokens: config.pipeline.window_max_tokens,
    };

    Ok(MessagePipeline::new(
        Arc::new(store),
        Arc::new(InProcessConversationCache::new(window_limits)),
        Arc::new(knowledge),
        providers,
        Arc::new(LocalBroadcaster::default()),
        outbound,
        PipelineConfig {
            webhook_secrets: config.webhooks.app_secrets(),
            context: ContextConfig {
                window_limits,
                retrieval_top_k: config.pipeline.retrieval_top_k,
            },
            defaults: GenerationDefaults {
                model: config.pipeline.default_model.clone(),
                temperature: config.pipeline.default_temperature,
                max_tokens: config.pipeline.default_max_tokens,
            },
        },
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = CliArgs::parse();

    let config = load_config(&args.config)?;
    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());

    let pipeline = build_pipeline(&config)?;
    let state = Arc::new(GatewayState {
        pipeline: Arc::new(pipeline),
        config: GatewayConfig {
            meta_verify_tokens: config.webhooks.verify_tokens(),
            telegram_webhook_secret: config.webhooks.telegram_secret_token.clone(),
        },
    });

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(address = %bind, "coral gateway listening");

    serve_gateway(state, listener).await
}
