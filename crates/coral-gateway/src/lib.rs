//! Webhook HTTP endpoints exposing the Coral pipeline.
//!
//! One POST route per platform plus the Meta subscription verification GET
//! routes. The body is read as the raw string so signatures are computed
//! over the exact bytes the platform signed. Authentication failures are
//! terminal for the call; accepted deliveries report per-message outcome
//! counts.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;

use coral_channels::Platform;
use coral_pipeline::{MessagePipeline, PipelineError, ProcessedMessage};

const META_SIGNATURE_HEADER: &str = "x-hub-signature-256";
const TELEGRAM_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Debug, Clone, Default)]
/// Public struct `GatewayConfig` used across Coral components.
pub struct GatewayConfig {
    /// `hub.verify_token` values for Meta webhook subscription handshakes.
    pub meta_verify_tokens: BTreeMap<Platform, String>,
    /// Optional Telegram secret token; checked only when configured.
    pub telegram_webhook_secret: Option<String>,
}

/// Public struct `GatewayState` used across Coral components.
pub struct GatewayState {
    pub pipeline: Arc<MessagePipeline>,
    pub config: GatewayConfig,
}

/// Builds the webhook router over shared gateway state.
pub fn build_webhook_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/healthz", get(handle_health))
        .route(
            "/webhooks/whatsapp",
            get(handle_whatsapp_verify).post(handle_whatsapp_webhook),
        )
        .route(
            "/webhooks/messenger",
            get(handle_messenger_verify).post(handle_messenger_webhook),
        )
        .route(
            "/webhooks/instagram",
            get(handle_instagram_verify).post(handle_instagram_webhook),
        )
        .route("/webhooks/telegram", post(handle_telegram_webhook))
        .with_state(state)
}

/// Serves the webhook router until the task is dropped.
pub async fn serve_gateway(state: Arc<GatewayState>, listener: TcpListener) -> Result<()> {
    let app = build_webhook_router(state);
    axum::serve(listener, app)
        .await
        .context("gateway server terminated")
}

async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

#[derive(Debug, Deserialize)]
struct MetaVerifyQuery {
    #[serde(rename = "hub.mode")]
    hub_mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    hub_verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    hub_challenge: Option<String>,
}

async fn handle_whatsapp_verify(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<MetaVerifyQuery>,
) -> impl IntoResponse {
    handle_meta_verify(state, Platform::Whatsapp, query)
}

async fn handle_messenger_verify(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<MetaVerifyQuery>,
) -> impl IntoResponse {
    handle_meta_verify(state, Platform::Messenger, query)
}

async fn handle_instagram_verify(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<MetaVerifyQuery>,
) -> impl IntoResponse {
    handle_meta_verify(state, Platform::Instagram, query)
}

fn handle_meta_verify(
    state: Arc<GatewayState>,
    platform: Platform,
    query: MetaVerifyQuery,
) -> axum::response::Response {
    let expected_token = state
        .config
        .meta_verify_tokens
        .get(&platform)
        .map(String::as_str)
        .map(str::trim)
        .unwrap_or("");
    let observed_token = query
        .hub_verify_token
        .as_deref()
        .map(str::trim)
        .unwrap_or("");
    let mode = query.hub_mode.unwrap_or_default();
    let challenge = query.hub_challenge.unwrap_or_default();

    if mode == "subscribe" && !expected_token.is_empty() && observed_token == expected_token {
        return (StatusCode::OK, challenge).into_response();
    }

    tracing::warn!(
        platform = platform.as_str(),
        "webhook subscription verification failed"
    );
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "error": {
                "code": "invalid_webhook_verification",
                "message": "webhook subscription verification failed"
            }
        })),
    )
        .into_response()
}

async fn handle_whatsapp_webhook(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: String,
) -> axum::response::Response {
    handle_platform_webhook(state, Platform::Whatsapp, headers, body).await
}

async fn handle_messenger_webhook(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: String,
) -> axum::response::Response {
    handle_platform_webhook(state, Platform::Messenger, headers, body).await
}

async fn handle_instagram_webhook(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: String,
) -> axum::response::Response {
    handle_platform_webhook(state, Platform::Instagram, headers, body).await
}

async fn handle_telegram_webhook(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: String,
) -> axum::response::Response {
    if let Some(expected_secret) = state.config.telegram_webhook_secret.as_deref() {
        let observed = headers
            .get(TELEGRAM_SECRET_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .unwrap_or("");
        if observed != expected_secret.trim() {
            tracing::warn!("telegram webhook secret mismatch");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": {
                        "code": "auth_failed",
                        "message": "invalid telegram webhook secret"
                    }
                })),
            )
                .into_response();
        }
    }
    handle_platform_webhook(state, Platform::Telegram, headers, body).await
}

async fn handle_platform_webhook(
    state: Arc<GatewayState>,
    platform: Platform,
    headers: HeaderMap,
    body: String,
) -> axum::response::Response {
    let signature = headers
        .get(META_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim);

    match state
        .pipeline
        .process_inbound(platform, body.as_str(), signature)
        .await
    {
        Ok(results) => accepted_response(&results),
        Err(PipelineError::Authentication { .. }) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": {
                    "code": "invalid_signature",
                    "message": "webhook signature verification failed"
                }
            })),
        )
            .into_response(),
        Err(error) => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": {
                    "code": error.code(),
                    "message": error.to_string()
                }
            })),
        )
            .into_response(),
    }
}

fn accepted_response(results: &[ProcessedMessage]) -> axum::response::Response {
    let failed = results.iter().filter(|result| !result.is_success()).count();
    (
        StatusCode::OK,
        Json(json!({
            "status": "accepted",
            "processed": results.len() - failed,
            "failed": failed,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests;
