//! Liveness endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::api::server::AppState;
use crate::health::HealthSnapshot;

/// GET /api/health: status, version, uptime and RSS.
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<HealthSnapshot> {
    Json(HealthSnapshot::capture(state.started))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::server::tests::test_state;

    #[tokio::test]
    async fn test_get_health_returns_ok() {
        let Json(body) = get_health(State(Arc::new(test_state()))).await;
        assert_eq!(body.status, "ok");
        assert_eq!(body.version, env!("CARGO_PKG_VERSION"));
    }
}
