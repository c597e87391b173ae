//! Chat endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::error_response;
use crate::api::server::AppState;
use crate::session::FingerprintParams;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Omitted for a new conversation; a fresh id is generated.
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub params: FingerprintParams,
}

/// POST /api/chat
pub async fn post_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> (StatusCode, Json<Value>) {
    if request.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "message must not be empty" })),
        );
    }
    let session_id = request
        .session_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    match state
        .handler
        .handle(&session_id, &request.message, &request.params)
        .await
    {
        Ok(reply) => match serde_json::to_value(&reply) {
            Ok(body) => (StatusCode::OK, Json(body)),
            Err(e) => error_response(&e.into()),
        },
        Err(err) => {
            if !err.is_programming_error() {
                warn!(session = %session_id, error = %err, "Chat request failed");
            }
            error_response(&err)
        }
    }
}
