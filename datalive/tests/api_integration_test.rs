//! Integration tests for the HTTP API

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use tokio::time::sleep;

use datalive::api::{ApiServer, AppState};
use datalive::{
    CompletionService, DocumentHit, QueryMetrics, ResultCombiner, SearchFilters, SemanticSearch,
    StrategyPlanner,
};
use datalive_kg::{AdaptiveCache, CacheConfig, EmbeddingService, KgError, MemoryStore, OfflineGraph};

const SECRET: &str = "test_secret_key_12345";

struct FixedCompletion;

#[async_trait]
impl CompletionService for FixedCompletion {
    async fn complete(&self, prompt: &str) -> datalive_kg::Result<String> {
        if prompt.contains("determine the optimal strategy") {
            Ok(r#"{"use_rag": true, "use_kag": true, "reasoning": "overview"}"#.to_string())
        } else {
            Ok("DataLive unifies enterprise knowledge.".to_string())
        }
    }
}

struct FixedDocuments;

#[async_trait]
impl SemanticSearch for FixedDocuments {
    async fn search(
        &self,
        query: &str,
        _filters: &SearchFilters,
        limit: usize,
        threshold: f32,
    ) -> datalive_kg::Result<Vec<DocumentHit>> {
        let hits = [0.95_f32, 0.85, 0.6]
            .iter()
            .enumerate()
            .filter(|(_, score)| **score >= threshold)
            .take(limit)
            .map(|(i, score)| DocumentHit {
                id: format!("doc-{}", i),
                title: format!("{} #{}", query, i),
                content: "DataLive connects documents, graphs and time.".to_string(),
                score: *score,
                source: "handbook.md".to_string(),
                document_type: "markdown".to_string(),
            })
            .collect();
        Ok(hits)
    }
}

struct NoEmbedder;

#[async_trait]
impl EmbeddingService for NoEmbedder {
    async fn embed(&self, _text: &str) -> datalive_kg::Result<Vec<f32>> {
        Err(KgError::EmbeddingError("model unavailable".into()))
    }
}

/// Start the API server in the background with in-memory collaborators
async fn start_test_server(port: u16) -> tokio::task::JoinHandle<()> {
    let config = CacheConfig::default();
    let store = Arc::new(MemoryStore::new(config.clone()));
    let cache = Arc::new(AdaptiveCache::new(config, store, Arc::new(NoEmbedder)));
    let completion = Arc::new(FixedCompletion);
    let graph = Arc::new(OfflineGraph::new("bolt://127.0.0.1:9"));
    let metrics = Arc::new(QueryMetrics::new());

    let combiner = ResultCombiner::new(
        cache,
        StrategyPlanner::new(completion.clone()),
        Arc::new(FixedDocuments),
        graph.clone(),
        graph,
        completion,
    )
    .with_metrics(metrics.clone());

    let state = AppState::new(Arc::new(combiner), metrics);
    let server = ApiServer::new(format!("127.0.0.1:{}", port), SECRET, state);

    let handle = tokio::spawn(async move {
        let _ = server.start().await;
    });
    sleep(Duration::from_secs(1)).await;
    handle
}

async fn login(client: &Client, port: u16) -> String {
    let body: serde_json::Value = client
        .post(format!("http://127.0.0.1:{}/login", port))
        .json(&json!({ "username": "ops", "password": "secret" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_check() {
    let port = 8081;
    let _server = start_test_server(port).await;

    let response = Client::new()
        .get(format!("http://127.0.0.1:{}/health", port))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_login() {
    let port = 8082;
    let _server = start_test_server(port).await;
    let client = Client::new();

    let response = client
        .post(format!("http://127.0.0.1:{}/login", port))
        .json(&json!({ "username": "ops", "password": "secret" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["token"].is_string());
    assert_eq!(body["expires_in_hours"], 24);

    let response = client
        .post(format!("http://127.0.0.1:{}/login", port))
        .json(&json!({ "username": "", "password": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_then_cached_chat() {
    let port = 8083;
    let _server = start_test_server(port).await;
    let client = Client::new();
    let url = format!("http://127.0.0.1:{}/api/v1/chat", port);
    let payload = json!({ "message": "What is DataLive?", "user_id": "42" });

    let response = client.post(&url).json(&payload).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first: serde_json::Value = response.json().await.unwrap();

    assert_eq!(first["response"], "DataLive unifies enterprise knowledge.");
    assert_eq!(first["strategy_used"], json!(["RAG"]));
    assert_eq!(first["cached"], false);
    assert_eq!(first["sources"].as_array().unwrap().len(), 2);
    assert_eq!(first["sources"][0]["type"], "document");
    assert!((first["confidence"].as_f64().unwrap() - 0.9).abs() < 1e-6);
    assert!(first["metadata"]["failures"]["kag"].is_string());

    // The cache write runs in the background
    sleep(Duration::from_millis(200)).await;

    let second: serde_json::Value = client
        .post(&url)
        .json(&payload)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["cached"], true);
    assert_eq!(second["response"], first["response"]);

    let check = client
        .post(format!("http://127.0.0.1:{}/api/v1/cache/check", port))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(check.status(), StatusCode::OK);

    let missing = client
        .post(format!("http://127.0.0.1:{}/api/v1/cache/check", port))
        .json(&json!({ "message": "Never asked before" }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let summary: serde_json::Value = client
        .get(format!("http://127.0.0.1:{}/api/v1/metrics/summary", port))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary["queries"]["queries"]["success"], 1);
    assert_eq!(summary["queries"]["queries"]["cached"], 1);
}

#[tokio::test]
async fn test_chat_rejects_empty_message() {
    let port = 8084;
    let _server = start_test_server(port).await;

    let response = Client::new()
        .post(format!("http://127.0.0.1:{}/api/v1/chat", port))
        .json(&json!({ "message": "   " }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("empty"));
}

#[tokio::test]
async fn test_invalidate_requires_token() {
    let port = 8085;
    let _server = start_test_server(port).await;
    let client = Client::new();
    let url = format!("http://127.0.0.1:{}/api/v1/cache/invalidate?pattern=user:42:*", port);

    let response = client.delete(&url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client
        .delete(&url)
        .header("Authorization", "Bearer invalid.token.here")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    client
        .post(format!("http://127.0.0.1:{}/api/v1/chat", port))
        .json(&json!({ "message": "What is DataLive?", "user_id": "42" }))
        .send()
        .await
        .unwrap();
    sleep(Duration::from_millis(200)).await;

    let token = login(&client, port).await;
    let response = client
        .delete(&url)
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["removed"], 1);
    assert!(body["message"].as_str().unwrap().contains("user:42:*"));

    let stats: serde_json::Value = client
        .get(format!("http://127.0.0.1:{}/api/v1/cache/stats", port))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["namespaces"]["user"], 0);
    assert_eq!(stats["namespaces"]["exact"], 1);
}

#[tokio::test]
async fn test_search_endpoints() {
    let port = 8086;
    let _server = start_test_server(port).await;
    let client = Client::new();

    let body: serde_json::Value = client
        .get(format!(
            "http://127.0.0.1:{}/api/v1/search/vector?query=overview&threshold=0.5",
            port
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["total"], 3);
    assert_eq!(body["results"][0]["score"].as_f64().unwrap() as f32, 0.95);

    let response = client
        .get(format!(
            "http://127.0.0.1:{}/api/v1/search/knowledge-graph?query=DataLive",
            port
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = client
        .get(format!(
            "http://127.0.0.1:{}/api/v1/search/temporal?query=DataLive&time_range=last_year",
            port
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_status_reports_missing_graph() {
    let port = 8087;
    let _server = start_test_server(port).await;

    let body: serde_json::Value = Client::new()
        .get(format!("http://127.0.0.1:{}/api/v1/status", port))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "degraded");
    assert_eq!(body["components"]["knowledge_graph"]["connected"], false);
    assert_eq!(body["components"]["cache"]["operational"], true);
    assert_eq!(body["caching_enabled"], true);
}
