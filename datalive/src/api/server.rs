use anyhow::Result;
use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use super::middleware::{auth_middleware, AuthState};
use super::routes::{
    cache_stats, chat, check_cache, health_check, invalidate_cache, login, metrics_summary,
    search_knowledge_graph, search_temporal, search_vector, status, AppState,
};

pub struct ApiServer {
    addr: String,
    jwt_secret: String,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(addr: impl Into<String>, jwt_secret: impl Into<String>, state: AppState) -> Self {
        Self {
            addr: addr.into(),
            jwt_secret: jwt_secret.into(),
            state: Arc::new(state),
        }
    }

    pub fn router(&self) -> Router {
        let auth_state = AuthState::new(&self.jwt_secret);

        Router::new()
            .route("/health", get(health_check))
            .route("/login", post(login))
            .with_state(auth_state.clone())
            .route("/api/v1/chat", post(chat))
            .route("/api/v1/cache/check", post(check_cache))
            .route("/api/v1/cache/stats", get(cache_stats))
            .route(
                "/api/v1/cache/invalidate",
                delete(invalidate_cache).route_layer(from_fn_with_state(auth_state, auth_middleware)),
            )
            .route("/api/v1/search/vector", get(search_vector))
            .route("/api/v1/search/knowledge-graph", get(search_knowledge_graph))
            .route("/api/v1/search/temporal", get(search_temporal))
            .route("/api/v1/status", get(status))
            .route("/api/v1/metrics/summary", get(metrics_summary))
            .with_state(self.state.clone())
            .layer(CorsLayer::permissive())
    }

    /// Serve until the process is stopped, then flush pending cache writes
    pub async fn start(self) -> Result<()> {
        let app = self.router();

        info!("Starting API server on {}", self.addr);
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        self.state.combiner.flush_cache_writes().await;
        info!("API server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
