//! Cache and session observability.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::api::server::AppState;

/// GET /api/performance: cache counters, active sessions and chat usage.
pub async fn get_performance(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "cache": state.cache().stats(),
        "sessions": { "active": state.conversations().len() },
        "usage": state.handler.metrics().snapshot(),
        "uptime_secs": state.started.elapsed().as_secs(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::server::tests::test_state;

    #[tokio::test]
    async fn test_performance_reports_cache_stats() {
        let state = Arc::new(test_state());
        state.cache().set("k", "v", None).unwrap();
        let _ = state.cache().get("k").unwrap();
        let _ = state.cache().get("missing").unwrap();

        let Json(body) = get_performance(State(state)).await;
        assert_eq!(body["cache"]["hits"], 1);
        assert_eq!(body["cache"]["misses"], 1);
        assert_eq!(body["cache"]["entries"], 1);
        assert_eq!(body["sessions"]["active"], 0);
        assert!(body["cache"]["hit_rate"].is_number());
    }
}
