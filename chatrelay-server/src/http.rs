//! chatrelay HTTP API
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! returning `(StatusCode, serde_json::Value)`, so the logic is testable
//! without router dispatch.
//!
//! Endpoints:
//! - GET  /: static landing page
//! - POST /chat: one conversation turn
//! - GET  /health: health check with DB status
//! - GET  /version: server version info

use std::sync::Arc;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chatrelay_core::{ChatRelayConfig, RelayError, HISTORY_FORMAT_VERSION};
use serde::Deserialize;
use sqlx::SqlitePool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::Instrument;
use uuid::Uuid;

use crate::service::{ChatService, ChatTurn};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Shared state for all HTTP handlers
pub struct AppState {
    pub service: ChatService,
    pub config: ChatRelayConfig,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/chat", post(chat_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("chatrelay HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

/// Body of `POST /chat`. Every field is optional at the wire level so that a
/// missing field is reported as a validation error, not a decode failure.
#[derive(Debug, Deserialize, Default)]
pub struct ChatRequest {
    pub input: Option<String>,
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
}

impl ChatRequest {
    /// Empty or whitespace-only strings and non-positive ids count as missing.
    pub fn validate(self) -> std::result::Result<ChatTurn, RelayError> {
        let input = self.input.filter(|s| !s.trim().is_empty());
        let user_id = self.user_id.filter(|id| *id > 0);
        let user_name = self.user_name.filter(|s| !s.trim().is_empty());

        match (input, user_id, user_name) {
            (Some(input), Some(user_id), Some(user_name)) => Ok(ChatTurn {
                user_id,
                user_name,
                input,
            }),
            (input, user_id, user_name) => {
                let mut missing = Vec::new();
                if input.is_none() {
                    missing.push("input");
                }
                if user_id.is_none() {
                    missing.push("user_id");
                }
                if user_name.is_none() {
                    missing.push("user_name");
                }
                Err(RelayError::Validation(format!(
                    "Input, user ID, and user name are required (missing: {})",
                    missing.join(", ")
                )))
            }
        }
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner chat: validates the request and runs one conversation turn.
pub async fn chat_inner(
    service: &ChatService,
    payload: std::result::Result<ChatRequest, String>,
) -> (StatusCode, serde_json::Value) {
    tracing::info!("Received a chat request");

    let request = match payload {
        Ok(r) => r,
        Err(detail) => {
            tracing::warn!(error = %detail, "Unreadable chat request body");
            return (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": format!("Invalid request body: {}", detail) }),
            );
        }
    };

    let turn = match request.validate() {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(error = %e, "Incomplete user data provided");
            return error_to_http(&e);
        }
    };

    let user_id = turn.user_id;
    match service.converse(turn).await {
        Ok(reply) => {
            tracing::info!(user_id, "Response generated");
            (StatusCode::OK, serde_json::json!({ "response": reply }))
        }
        Err(e) => {
            tracing::error!(user_id, error = %e, "Error during conversation");
            error_to_http(&e)
        }
    }
}

/// Inner health check: queries DB and returns (status_code, json_body).
pub async fn health_inner(pool: &SqlitePool) -> (StatusCode, serde_json::Value) {
    match chatrelay_core::db::health_check(pool).await {
        Ok(v) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "sqlite": v,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "chatrelay/1",
        "history_format": HISTORY_FORMAT_VERSION,
    })
}

// ============================================================================
// Axum handler wrappers (thin, delegating to inner functions)
// ============================================================================

pub async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> impl IntoResponse {
    let payload = payload.map(|Json(r)| r).map_err(|e| e.body_text());
    let span = tracing::info_span!("chat", request_id = %Uuid::new_v4());
    let (status, body) = chat_inner(&state.service, payload).instrument(span).await;
    (status, Json(body))
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.service.store().pool()).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

// ============================================================================
// Helpers
// ============================================================================

/// Map a turn failure to its HTTP response. Only validation messages reach
/// the caller; everything else is an opaque 500.
pub fn error_to_http(e: &RelayError) -> (StatusCode, serde_json::Value) {
    match e {
        RelayError::Validation(msg) => (
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": msg }),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": "Internal Server Error" }),
        ),
    }
}
