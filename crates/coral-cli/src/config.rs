//! TOML configuration for the `coral` binary.
//!
//! Secrets may be left out of the file and supplied through environment
//! variables (`CORAL_OPENAI_API_KEY`, `CORAL_ANTHROPIC_API_KEY`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use coral_channels::{OutboundMode, Platform};

pub const OPENAI_API_KEY_ENV: &str = "CORAL_OPENAI_API_KEY";
pub const ANTHROPIC_API_KEY_ENV: &str = "CORAL_ANTHROPIC_API_KEY";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
/// Public struct `CoralConfig` used across Coral components.
pub struct CoralConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub webhooks: WebhookSettings,
    #[serde(default)]
    pub outbound: OutboundSettings,
    #[serde(default)]
    pub providers: ProviderSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
/// Public struct `ServerConfig` used across Coral components.
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
/// Public struct `StoreConfig` used across Coral components.
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("coral.db")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
/// Public struct `KnowledgeConfig` used across Coral components.
pub struct KnowledgeConfig {
    #[serde(default = "default_knowledge_path")]
    pub path: PathBuf,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            path: default_knowledge_path(),
        }
    }
}

fn default_knowledge_path() -> PathBuf {
    PathBuf::from("knowledge.jsonl")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
/// Public struct `PipelineSettings` used across Coral components.
pub struct PipelineSettings {
    #[serde(default = "default_window_max_turns")]
    pub window_max_turns: usize,
    #[serde(default = "default_window_max_tokens")]
    pub window_max_tokens: usize,
    #[serde(default = "default_retrieval_top_k")]
    pub retrieval_top_k: usize,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            window_max_turns: default_window_max_turns(),
            window_max_tokens: default_window_max_tokens(),
            retrieval_top_k: default_retrieval_top_k(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
        }
    }
}

fn default_window_max_turns() -> usize {
    20
}

fn default_window_max_tokens() -> usize {
    4000
}

fn default_retrieval_top_k() -> usize {
    4
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
/// Public struct `WebhookSettings` used across Coral components.
pub struct WebhookSettings {
    #[serde(default)]
    pub whatsapp_app_secret: Option<String>,
    #[serde(default)]
    pub messenger_app_secret: Option<String>,
    #[serde(default)]
    pub instagram_app_secret: Option<String>,
    #[serde(default)]
    pub whatsapp_verify_token: Option<String>,
    #[serde(default)]
    pub messenger_verify_token: Option<String>,
    #[serde(default)]
    pub instagram_verify_token: Option<String>,
    #[serde(default)]
    pub telegram_secret_token: Option<String>,
}

impl WebhookSettings {
    pub fn app_secrets(&self) -> BTreeMap<Platform, String> {
        let mut secrets = BTreeMap::new();
        for (platform, secret) in [
            (Platform::Whatsapp, &self.whatsapp_app_secret),
            (Platform::Messenger, &self.messenger_app_secret),
            (Platform::Instagram, &self.instagram_app_secret),
        ] {
            if let Some(secret) = secret.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                secrets.insert(platform, secret.to_string());
            }
        }
        secrets
    }

    pub fn verify_tokens(&self) -> BTreeMap<Platform, String> {
        let mut tokens = BTreeMap::new();
        for (platform, token) in [
            (Platform::Whatsapp, &self.whatsapp_verify_token),
            (Platform::Messenger, &self.messenger_verify_token),
            (Platform::Instagram, &self.instagram_verify_token),
        ] {
            if let Some(token) = token.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                tokens.insert(platform, token.to_string());
            }
        }
        tokens
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
/// Public struct `OutboundSettings` used across Coral components.
pub struct OutboundSettings {
    #[serde(default = "default_outbound_mode")]
    pub mode: String,
    #[serde(default = "default_outbound_timeout_ms")]
    pub http_timeout_ms: u64,
}

impl Default for OutboundSettings {
    fn default() -> Self {
        Self {
            mode: default_outbound_mode(),
            http_timeout_ms: default_outbound_timeout_ms(),
        }
    }
}

fn default_outbound_mode() -> String {
    "provider".to_string()
}

fn default_outbound_timeout_ms() -> u64 {
    5000
}

impl OutboundSettings {
    pub fn parse_mode(&self) -> Result<OutboundMode> {
        match self.mode.trim().to_ascii_lowercase().as_str() {
            "provider" => Ok(OutboundMode::Provider),
            "dry_run" | "dry-run" => Ok(OutboundMode::DryRun),
            other => bail!("unsupported outbound mode '{other}' (expected provider|dry_run)"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
/// Public struct `ProviderSettings` used across Coral components.
pub struct ProviderSettings {
    #[serde(default)]
    pub openai: Option<ProviderEntry>,
    #[serde(default)]
    pub anthropic: Option<ProviderEntry>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
/// Public struct `ProviderEntry` used across Coral components.
pub struct ProviderEntry {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
}

impl ProviderEntry {
    /// Resolves the API key from configuration, falling back to `env_var`.
    pub fn resolve_api_key(&self, env_var: &str) -> Option<String> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .or_else(|| {
                std::env::var(env_var)
                    .ok()
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
    }
}

/// Loads configuration from `path`; a missing file yields defaults.
pub fn load_config(path: &Path) -> Result<CoralConfig> {
    if !path.exists() {
        return Ok(CoralConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str::<CoralConfig>(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use coral_channels::{OutboundMode, Platform};

    use super::{load_config, CoralConfig};

    const SAMPLE: &str = r#"
[server]
bind = "0.0.0.0:9090"

[store]
path = "/var/lib/coral/coral.db"

[pipeline]
window_max_turns = 12
default_model = "claude-3-5-haiku-latest"

[webhooks]
whatsapp_app_secret = "wa-secret"
whatsapp_verify_token = "verify-me"

[outbound]
mode = "dry_run"

[providers.anthropic]
api_key = "sk-ant-test"
"#;

    #[test]
    fn functional_sample_config_parses_with_defaults_applied() {
        let config = toml::from_str::<CoralConfig>(SAMPLE).expect("parse");
        assert_eq!(config.server.bind, "0.0.0.0:9090");
        assert_eq!(config.pipeline.window_max_turns, 12);
        // Unset fields keep their defaults.
        assert_eq!(config.pipeline.retrieval_top_k, 4);
        assert_eq!(config.pipeline.default_model, "claude-3-5-haiku-latest");
        assert_eq!(config.outbound.parse_mode().expect("mode"), OutboundMode::DryRun);

        let secrets = config.webhooks.app_secrets();
        assert_eq!(secrets.get(&Platform::Whatsapp).map(String::as_str), Some("wa-secret"));
        assert!(!secrets.contains_key(&Platform::Messenger));

        let anthropic = config.providers.anthropic.expect("anthropic entry");
        assert_eq!(
            anthropic.resolve_api_key("CORAL_TEST_UNSET_ENV").as_deref(),
            Some("sk-ant-test")
        );
    }

    #[test]
    fn unit_missing_config_file_yields_defaults() {
        let config = load_config(Path::new("/definitely/not/here/coral.toml")).expect("defaults");
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.pipeline.window_max_turns, 20);
        assert!(config.webhooks.app_secrets().is_empty());
    }

    #[test]
    fn regression_unknown_keys_are_rejected() {
        let error = toml::from_str::<CoralConfig>("[server]\nbindd = \"oops\"\n")
            .expect_err("typo should fail");
        assert!(error.to_string().contains("bindd"));
    }
}
