//! Request handlers
//!
//! Chat and cache endpoints go through the [`ResultCombiner`]; the search
//! endpoints call one retrieval backend directly and return its raw output.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use datalive_kg::cache::KeyPattern;
use datalive_kg::graph::neo4j::MAX_DEPTH;
use datalive_kg::{KgError, Neo4jClient, TimeRange};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use super::auth::TOKEN_TTL_HOURS;
use super::middleware::AuthState;
use crate::combiner::ResultCombiner;
use crate::error::QueryError;
use crate::metrics::QueryMetrics;
use crate::query::{QueryRequest, QueryResponse, ResponseMetadata, Source};
use crate::services::SearchFilters;

pub struct AppState {
    pub combiner: Arc<ResultCombiner>,
    pub metrics: Arc<QueryMetrics>,
    /// `None` when the graph database was unreachable at startup
    pub graph_client: Option<Arc<Neo4jClient>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(combiner: Arc<ResultCombiner>, metrics: Arc<QueryMetrics>) -> Self {
        Self {
            combiner,
            metrics,
            graph_client: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_graph_client(mut self, client: Arc<Neo4jClient>) -> Self {
        self.graph_client = Some(client);
        self
    }
}

/// Error body `{"error": "..."}` with a matching status
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::InvalidRequest(_) => Self::new(StatusCode::BAD_REQUEST, e.to_string()),
            QueryError::Cancelled => Self::new(StatusCode::REQUEST_TIMEOUT, e.to_string()),
        }
    }
}

impl From<KgError> for ApiError {
    fn from(e: KgError) -> Self {
        error!("Backend failure: {}", e);
        let status = if e.is_unavailable() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self::new(status, e.to_string())
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in_hours: i64,
}

/// Issues a token for any non-empty credentials
pub async fn login(
    State(auth): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, StatusCode> {
    if payload.username.is_empty() || payload.password.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let token = auth
        .jwt
        .issue(&payload.username, Some(TOKEN_TTL_HOURS))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(LoginResponse {
        token,
        expires_in_hours: TOKEN_TTL_HOURS,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
    #[serde(default)]
    pub filters: SearchFilters,
}

fn default_use_cache() -> bool {
    true
}

impl From<ChatRequest> for QueryRequest {
    fn from(chat: ChatRequest) -> Self {
        QueryRequest {
            text: chat.message,
            user_id: chat.user_id,
            session_id: chat.session_id,
            context: chat.context,
            filters: chat.filters,
            use_cache: chat.use_cache,
            query_type: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub sources: Vec<Source>,
    pub confidence: f64,
    pub strategy_used: Vec<String>,
    pub processing_time: f64,
    pub cached: bool,
    pub metadata: ResponseMetadata,
}

impl From<QueryResponse> for ChatResponse {
    fn from(r: QueryResponse) -> Self {
        Self {
            response: r.answer,
            sources: r.sources,
            confidence: r.confidence,
            strategy_used: r.strategies_used,
            processing_time: r.processing_time_seconds,
            cached: r.cached,
            metadata: r.metadata,
        }
    }
}

pub async fn chat(
    State(app): State<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> ApiResult<ChatResponse> {
    let response = app.combiner.process_query(payload.into()).await?;
    Ok(Json(response.into()))
}

pub async fn check_cache(
    State(app): State<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> ApiResult<ChatResponse> {
    let request = QueryRequest::from(payload);
    match app.combiner.check_cache(&request).await? {
        Some(response) => Ok(Json(response.into())),
        None => Err(ApiError::new(StatusCode::NOT_FOUND, "No cached response")),
    }
}

pub async fn cache_stats(State(app): State<Arc<AppState>>) -> ApiResult<datalive_kg::CacheStats> {
    Ok(Json(app.combiner.cache_stats().await?))
}

#[derive(Deserialize)]
pub struct InvalidateParams {
    pub pattern: String,
}

#[derive(Serialize)]
pub struct InvalidateResponse {
    pub message: String,
    pub removed: usize,
}

pub async fn invalidate_cache(
    State(app): State<Arc<AppState>>,
    Query(params): Query<InvalidateParams>,
) -> ApiResult<InvalidateResponse> {
    if params.pattern.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "pattern is required"));
    }
    KeyPattern::parse(&params.pattern)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;

    let removed = app.combiner.invalidate_cache_pattern(&params.pattern).await?;
    info!("Invalidated {} cache keys matching {}", removed, params.pattern);

    Ok(Json(InvalidateResponse {
        message: format!("Cache invalidated for pattern: {}", params.pattern),
        removed,
    }))
}

#[derive(Deserialize)]
pub struct VectorSearchParams {
    pub query: String,
    #[serde(default = "default_vector_limit")]
    pub limit: usize,
    #[serde(default = "default_vector_threshold")]
    pub threshold: f32,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

fn default_vector_limit() -> usize {
    10
}

fn default_vector_threshold() -> f32 {
    0.7
}

pub async fn search_vector(
    State(app): State<Arc<AppState>>,
    Query(params): Query<VectorSearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    let filters = SearchFilters {
        document_type: params.document_type,
        source: params.source,
    };
    let results = app
        .combiner
        .semantic()
        .search(
            &params.query,
            &filters,
            params.limit.clamp(1, crate::planner::MAX_RAG_LIMIT),
            params.threshold,
        )
        .await?;

    Ok(Json(json!({
        "query": params.query,
        "total": results.len(),
        "results": results,
    })))
}

#[derive(Deserialize)]
pub struct GraphSearchParams {
    pub query: String,
    #[serde(default = "default_graph_depth")]
    pub max_depth: u32,
    #[serde(default = "default_graph_limit")]
    pub limit: usize,
}

fn default_graph_depth() -> u32 {
    3
}

fn default_graph_limit() -> usize {
    20
}

pub async fn search_knowledge_graph(
    State(app): State<Arc<AppState>>,
    Query(params): Query<GraphSearchParams>,
) -> ApiResult<datalive_kg::GraphAnalysis> {
    let analysis = app
        .combiner
        .graph()
        .analyze_relationships(
            &params.query,
            params.max_depth.clamp(1, MAX_DEPTH),
            params.limit.max(1),
        )
        .await?;
    Ok(Json(analysis))
}

#[derive(Deserialize)]
pub struct TemporalSearchParams {
    pub query: String,
    #[serde(default)]
    pub time_range: Option<String>,
}

pub async fn search_temporal(
    State(app): State<Arc<AppState>>,
    Query(params): Query<TemporalSearchParams>,
) -> ApiResult<datalive_kg::TemporalAnalysis> {
    let time_range = TimeRange::parse_or_default(params.time_range.as_deref());
    Ok(Json(app.combiner.temporal().search(&params.query, time_range).await?))
}

/// Component health; the graph database is the only external dependency probed
pub async fn status(State(app): State<Arc<AppState>>) -> impl IntoResponse {
    let graph = match app.graph_client {
        Some(ref client) => {
            let result = client.health_check_detailed().await;
            json!({
                "connected": true,
                "operational": result.status.is_operational(),
                "health": result,
            })
        }
        None => json!({ "connected": false, "operational": false }),
    };

    let cache = match app.combiner.cache_stats().await {
        Ok(stats) => json!({ "operational": true, "stats": stats }),
        Err(e) => json!({ "operational": false, "error": e.to_string() }),
    };

    let degraded = graph["operational"] != json!(true) || cache["operational"] != json!(true);

    Json(json!({
        "status": if degraded { "degraded" } else { "operational" },
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": app.started_at.elapsed().as_secs(),
        "caching_enabled": app.combiner.config().enable_caching,
        "components": {
            "cache": cache,
            "knowledge_graph": graph,
            "indexed_embeddings": app.combiner.cache().indexed_embeddings().await,
        },
    }))
}

pub async fn metrics_summary(State(app): State<Arc<AppState>>) -> impl IntoResponse {
    let cache = app.combiner.cache_stats().await.ok();
    Json(json!({
        "queries": app.metrics.summary(),
        "cache": cache,
    }))
}
