//! Axum API server.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, Method};
use axum::middleware as axum_mw;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::agent::ChatHandler;
use crate::cache::ResponseCache;
use crate::config::ApiConfig;
use crate::error::Result;
use crate::session::ConversationManager;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared state for all API handlers.
#[derive(Clone)]
pub struct AppState {
    /// Bearer token required on protected endpoints. `None` disables auth.
    pub api_token: Option<String>,
    pub handler: Arc<ChatHandler>,
    pub started: Instant,
}

impl AppState {
    pub fn new(handler: Arc<ChatHandler>) -> Self {
        Self {
            api_token: None,
            handler,
            started: Instant::now(),
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.api_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        self.handler.cache()
    }

    pub fn conversations(&self) -> &Arc<ConversationManager> {
        self.handler.conversations()
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: AppState) -> Router {
    let shared_state = Arc::new(state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
        ]);

    Router::new()
        .route("/api/health", get(super::routes::health::get_health))
        .route(
            "/api/performance",
            get(super::routes::performance::get_performance),
        )
        .route("/api/cache/clear", post(super::routes::cache::clear_cache))
        .route("/api/chat", post(super::routes::chat::post_chat))
        .route("/api/sessions", get(super::routes::sessions::list_sessions))
        .route(
            "/api/sessions/{id}",
            get(super::routes::sessions::get_session)
                .delete(super::routes::sessions::delete_session),
        )
        .route(
            "/api/sessions/{id}/reset",
            post(super::routes::sessions::reset_session),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(axum_mw::from_fn_with_state(
            shared_state.clone(),
            super::middleware::auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state)
}

/// Serve until `shutdown_rx` flips to `true`.
pub async fn start_server(
    config: &ApiConfig,
    state: AppState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while shutdown_rx.changed().await.is_ok() {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        })
        .await?;
    info!("API server stopped");
    Ok(())
}
