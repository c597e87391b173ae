//! Route handlers.

pub mod cache;
pub mod chat;
pub mod health;
pub mod performance;
pub mod sessions;

use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::error::WayfarerError;

/// Map a crate error to an HTTP status and JSON body.
pub(crate) fn error_response(err: &WayfarerError) -> (StatusCode, Json<Value>) {
    let status = match err {
        WayfarerError::InvalidKey(_) | WayfarerError::InvalidSessionId(_) => {
            StatusCode::BAD_REQUEST
        }
        WayfarerError::Provider(_) => StatusCode::BAD_GATEWAY,
        WayfarerError::Config(_) | WayfarerError::Io(_) | WayfarerError::Serde(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "error": err.to_string() })))
}

pub(crate) fn not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "session not found" })),
    )
}
