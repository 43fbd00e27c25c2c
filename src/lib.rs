//! Core library for Warelay.  This module wires the webhook HTTP surface to
//! the inbound-message pipeline: validation, completion, WhatsApp formatting
//! and delivery.  Components are constructed once at startup and injected
//! into the processor so tests can substitute either side.

mod config;
pub mod completion;
pub mod processor;
pub mod sender;
pub mod transform;

pub use config::AppConfig;

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::completion::CompletionClient;
use crate::processor::{MessageProcessor, ProcessOutcome};
use crate::sender::WhatsAppSender;

/// Shared application state.  The processor handle is read-only after
/// construction; concurrent webhook invocations need no coordination.
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<MessageProcessor>,
    pub verify_token: String,
}

/// Construct the pipeline from configuration.  Config loading has already
/// failed fast on anything missing, so this cannot partially initialise.
pub fn build_state(config: &AppConfig) -> AppState {
    let completion = Arc::new(CompletionClient::new(config));
    let sender = Arc::new(WhatsAppSender::new(config));
    AppState {
        processor: Arc::new(MessageProcessor::new(completion, sender)),
        verify_token: config.verify_token.clone(),
    }
}

/// Build the Axum router and attach handlers.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(webhook_handler).get(verify_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

/// Query parameters of the Meta webhook verification handshake.
#[derive(Debug, Deserialize)]
struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// Handler for `GET /webhook`.  Echoes the challenge when the platform
/// presents the configured verification token.
async fn verify_handler(
    State(state): State<AppState>,
    Query(params): Query<VerifyQuery>,
) -> axum::response::Response {
    let subscribed = params.mode.as_deref() == Some("subscribe")
        && params.verify_token.as_deref() == Some(state.verify_token.as_str());
    if subscribed {
        tracing::info!("webhook verified");
        (StatusCode::OK, params.challenge.unwrap_or_default()).into_response()
    } else {
        tracing::warn!("webhook verification failed");
        let body = serde_json::json!({"status": "error", "message": "Verification failed"});
        (StatusCode::FORBIDDEN, Json(body)).into_response()
    }
}

/// Handler for `POST /webhook`.  Parses the inbound JSON and hands it to the
/// processor; the outcome's status code governs the HTTP response.
async fn webhook_handler(
    State(state): State<AppState>,
    Json(envelope): Json<serde_json::Value>,
) -> axum::response::Response {
    let ProcessOutcome { status, body } = state.processor.process(&envelope).await;
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::json!({"statusCode": status.as_u16(), "body": body});
    (status, Json(body)).into_response()
}

/// Simple health endpoint for container readiness / liveness checks.
async fn healthz_handler() -> axum::response::Response {
    let json = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(json)).into_response()
}
