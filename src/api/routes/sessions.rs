//! Session inspection and lifecycle routes.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use super::{error_response, not_found};
use crate::api::server::AppState;

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "sessions": state.conversations().session_ids() }))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.conversations().get(&id) {
        Ok(Some(view)) => (StatusCode::OK, Json(json!(view))),
        Ok(None) => not_found(),
        Err(err) => error_response(&err),
    }
}

pub async fn reset_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.conversations().reset(&id) {
        Ok(Some(view)) => (StatusCode::OK, Json(json!(view))),
        Ok(None) => not_found(),
        Err(err) => error_response(&err),
    }
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.conversations().remove(&id) {
        Ok(true) => (StatusCode::OK, Json(json!({ "deleted": id }))),
        Ok(false) => not_found(),
        Err(err) => error_response(&err),
    }
}
