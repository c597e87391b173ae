//! Cache administration.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::api::server::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClearRequest {
    /// Also zero the hit/miss/eviction counters.
    pub reset_stats: bool,
}

/// POST /api/cache/clear: drop every entry. Counters survive unless
/// `{"reset_stats": true}` is sent.
pub async fn clear_cache(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let request: ClearRequest = if body.is_empty() {
        ClearRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("invalid body: {e}") })),
                )
            }
        }
    };

    let removed = state.cache().len();
    state.cache().clear();
    if request.reset_stats {
        state.cache().reset_stats();
    }
    info!(removed, reset_stats = request.reset_stats, "Cache cleared via API");

    (
        StatusCode::OK,
        Json(json!({
            "cleared": removed,
            "stats": state.cache().stats(),
        })),
    )
}
