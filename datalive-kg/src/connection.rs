//! Neo4j connection management and health checks
//!
//! The client owns the neo4rs connection pool used by graph retrieval and
//! reports database health for the service status endpoint.

use crate::error::{KgError, Result};
use chrono::{DateTime, Utc};
use neo4rs::{query, ConfigBuilder, Graph};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Connection settings for the knowledge graph
#[derive(Debug, Clone)]
pub struct GraphConnectionConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: usize,
    pub fetch_size: usize,
}

impl Default for GraphConnectionConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "password".to_string(),
            database: "neo4j".to_string(),
            max_connections: 16,
            fetch_size: 500,
        }
    }
}

impl GraphConnectionConfig {
    /// Defaults overridden by `NEO4J_URI`, `NEO4J_USER`, `NEO4J_PASSWORD` and
    /// `NEO4J_DATABASE`
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let defaults = Self::default();
        let var = |name: &str, fallback: String| std::env::var(name).unwrap_or(fallback);

        Self {
            uri: var("NEO4J_URI", defaults.uri),
            user: var("NEO4J_USER", defaults.user),
            password: var("NEO4J_PASSWORD", defaults.password),
            database: var("NEO4J_DATABASE", defaults.database),
            ..defaults
        }
    }
}

/// Configuration for health check behavior
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Health check method to use
    pub method: HealthCheckMethod,
    /// Upper bound for a single check
    pub timeout: Duration,
    /// Retries after the first failed attempt
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Fall back from `db.ping()` to `RETURN 1` when the procedure fails
    pub enable_fallback: bool,
    /// Response time above which a healthy database is reported degraded
    pub degraded_threshold_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            method: HealthCheckMethod::Ping,
            timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            enable_fallback: true,
            degraded_threshold_ms: 1000,
        }
    }
}

/// Health check method variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckMethod {
    /// `RETURN 1`
    Simple,
    /// `CALL db.ping()` (Neo4j 4.1+)
    Ping,
    /// `CALL db.info()` with database name and id
    Detailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Responsive but slower than the degraded threshold
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Convert to HTTP status code equivalent
    pub fn to_http_status_code(&self) -> u16 {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => 200,
            HealthStatus::Unhealthy => 503,
        }
    }

    /// Healthy or degraded
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// Outcome of a health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub response_time_ms: u64,
    pub database_name: Option<String>,
    pub database_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
    pub check_method: HealthCheckMethod,
    pub retry_count: u32,
    pub used_fallback: bool,
}

impl HealthCheckResult {
    fn healthy(
        response_time: Duration,
        method: HealthCheckMethod,
        degraded_threshold_ms: u64,
    ) -> Self {
        let response_time_ms = response_time.as_millis() as u64;
        let status = if response_time_ms > degraded_threshold_ms {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            response_time_ms,
            database_name: None,
            database_id: None,
            timestamp: Utc::now(),
            error: None,
            check_method: method,
            retry_count: 0,
            used_fallback: false,
        }
    }

    fn unhealthy(response_time: Duration, error: &str, method: HealthCheckMethod) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            response_time_ms: response_time.as_millis() as u64,
            database_name: None,
            database_id: None,
            timestamp: Utc::now(),
            error: Some(error.to_string()),
            check_method: method,
            retry_count: 0,
            used_fallback: false,
        }
    }

    fn with_identity(mut self, name: Option<String>, id: Option<String>) -> Self {
        self.database_name = name;
        self.database_id = id;
        self
    }
}

/// Neo4j client with connection pooling
pub struct Neo4jClient {
    graph: Graph,
    uri: String,
    health_config: HealthCheckConfig,
}

impl Neo4jClient {
    /// Connect with default pool and health check settings
    ///
    /// ```no_run
    /// use datalive_kg::Neo4jClient;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let client = Neo4jClient::new("bolt://localhost:7687", "neo4j", "password", "neo4j").await?;
    ///     println!("healthy: {}", client.health_check().await?);
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(uri: &str, user: &str, password: &str, database: &str) -> Result<Self> {
        let config = GraphConnectionConfig {
            uri: uri.to_string(),
            user: user.to_string(),
            password: password.to_string(),
            database: database.to_string(),
            ..Default::default()
        };
        Self::connect(&config, HealthCheckConfig::default()).await
    }

    pub async fn connect(
        config: &GraphConnectionConfig,
        health_config: HealthCheckConfig,
    ) -> Result<Self> {
        info!(
            "Connecting to Neo4j at {} (database: {})",
            config.uri, config.database
        );

        let neo_config = ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(config.user.as_str())
            .password(config.password.as_str())
            .db(config.database.as_str())
            .fetch_size(config.fetch_size)
            .max_connections(config.max_connections)
            .build()
            .map_err(|e| KgError::ConfigError(e.to_string()))?;

        let graph = Graph::connect(neo_config)
            .await
            .map_err(|e| KgError::ConnectionError(e.to_string()))?;

        info!("Successfully connected to Neo4j");

        Ok(Self {
            graph,
            uri: config.uri.clone(),
            health_config,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Underlying neo4rs pool
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn health_config(&self) -> &HealthCheckConfig {
        &self.health_config
    }

    async fn bounded<T, F>(&self, context: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.health_config.timeout, fut)
            .await
            .map_err(|_| KgError::TimeoutError {
                timeout_seconds: self.health_config.timeout.as_secs(),
                context: context.to_string(),
            })?
    }

    /// `RETURN 1`, the cheapest liveness probe
    pub async fn health_check(&self) -> Result<bool> {
        debug!("Executing simple health check (RETURN 1)");

        self.bounded("RETURN 1", async {
            self.graph
                .run(query("RETURN 1"))
                .await
                .map_err(|e| KgError::ConnectionError(e.to_string()))
        })
        .await?;

        Ok(true)
    }

    /// `CALL db.ping()`
    pub async fn health_check_ping(&self) -> Result<HealthStatus> {
        debug!("Executing standard health check (CALL db.ping())");

        self.bounded("db.ping()", async {
            let mut result = self
                .graph
                .execute(query("CALL db.ping()"))
                .await
                .map_err(|e| KgError::QueryError(e.to_string()))?;

            match result
                .next()
                .await
                .map_err(|e| KgError::QueryError(e.to_string()))?
            {
                Some(row) => {
                    let success: bool = row.get("success").unwrap_or(false);
                    if success {
                        Ok(HealthStatus::Healthy)
                    } else {
                        warn!("db.ping() returned success=false");
                        Ok(HealthStatus::Unhealthy)
                    }
                }
                None => Err(KgError::QueryError(
                    "No result returned from db.ping()".to_string(),
                )),
            }
        })
        .await
    }

    /// `CALL db.info()`; never fails, errors are reported in the result
    pub async fn health_check_detailed(&self) -> HealthCheckResult {
        debug!("Executing detailed health check (CALL db.info())");
        let start = Instant::now();

        let outcome = self
            .bounded("db.info()", async {
                let mut result = self
                    .graph
                    .execute(query("CALL db.info()"))
                    .await
                    .map_err(|e| KgError::QueryError(format!("Query execution failed: {}", e)))?;
                result
                    .next()
                    .await
                    .map_err(|e| KgError::QueryError(format!("Failed to read results: {}", e)))
            })
            .await;

        let elapsed = start.elapsed();
        match outcome {
            Ok(Some(row)) => HealthCheckResult::healthy(
                elapsed,
                HealthCheckMethod::Detailed,
                self.health_config.degraded_threshold_ms,
            )
            .with_identity(row.get("name").ok(), row.get("id").ok()),
            Ok(None) => {
                error!("Detailed health check returned no results");
                HealthCheckResult::unhealthy(
                    elapsed,
                    "No result returned from db.info()",
                    HealthCheckMethod::Detailed,
                )
            }
            Err(e) => {
                error!("Detailed health check failed: {}", e);
                HealthCheckResult::unhealthy(elapsed, &e.to_string(), HealthCheckMethod::Detailed)
            }
        }
    }

    /// One attempt with the configured method, plus ping fallback
    async fn attempt(&self, used_fallback: &mut bool) -> HealthCheckResult {
        let start = Instant::now();
        let threshold = self.health_config.degraded_threshold_ms;

        match self.health_config.method {
            HealthCheckMethod::Simple => match self.health_check().await {
                Ok(_) => HealthCheckResult::healthy(start.elapsed(), HealthCheckMethod::Simple, threshold),
                Err(e) => HealthCheckResult::unhealthy(
                    start.elapsed(),
                    &e.to_string(),
                    HealthCheckMethod::Simple,
                ),
            },
            HealthCheckMethod::Ping => match self.health_check_ping().await {
                Ok(HealthStatus::Unhealthy) => HealthCheckResult::unhealthy(
                    start.elapsed(),
                    "db.ping() reported failure",
                    HealthCheckMethod::Ping,
                ),
                Ok(_) => HealthCheckResult::healthy(start.elapsed(), HealthCheckMethod::Ping, threshold),
                Err(e) if self.health_config.enable_fallback && !*used_fallback => {
                    warn!("db.ping() failed, falling back to RETURN 1: {}", e);
                    *used_fallback = true;
                    match self.health_check().await {
                        Ok(_) => HealthCheckResult::healthy(
                            start.elapsed(),
                            HealthCheckMethod::Simple,
                            threshold,
                        ),
                        Err(fallback_err) => HealthCheckResult::unhealthy(
                            start.elapsed(),
                            &fallback_err.to_string(),
                            HealthCheckMethod::Simple,
                        ),
                    }
                }
                Err(e) => HealthCheckResult::unhealthy(
                    start.elapsed(),
                    &e.to_string(),
                    HealthCheckMethod::Ping,
                ),
            },
            HealthCheckMethod::Detailed => self.health_check_detailed().await,
        }
    }

    /// Configured check with retries and fallback
    pub async fn health_check_with_retry(&self) -> HealthCheckResult {
        let mut retry_count = 0;
        let mut used_fallback = false;

        loop {
            let mut result = self.attempt(&mut used_fallback).await;

            if result.status.is_operational() || retry_count >= self.health_config.max_retries {
                result.retry_count = retry_count;
                result.used_fallback = used_fallback;
                return result;
            }

            retry_count += 1;
            warn!(
                "Health check failed (attempt {}/{}), retrying after {:?}",
                retry_count,
                self.health_config.max_retries + 1,
                self.health_config.retry_delay
            );
            tokio::time::sleep(self.health_config.retry_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_http_codes() {
        assert_eq!(HealthStatus::Healthy.to_http_status_code(), 200);
        assert_eq!(HealthStatus::Degraded.to_http_status_code(), 200);
        assert_eq!(HealthStatus::Unhealthy.to_http_status_code(), 503);
        assert!(!HealthStatus::Unhealthy.is_operational());
    }

    #[test]
    fn test_degraded_threshold() {
        let fast = HealthCheckResult::healthy(
            Duration::from_millis(50),
            HealthCheckMethod::Ping,
            1000,
        );
        assert_eq!(fast.status, HealthStatus::Healthy);

        let slow = HealthCheckResult::healthy(
            Duration::from_millis(1500),
            HealthCheckMethod::Ping,
            1000,
        );
        assert_eq!(slow.status, HealthStatus::Degraded);
        assert!(slow.status.is_operational());
    }

    #[test]
    fn test_unhealthy_result_carries_error() {
        let result = HealthCheckResult::unhealthy(
            Duration::from_millis(100),
            "Connection refused",
            HealthCheckMethod::Simple,
        );
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert_eq!(result.error.as_deref(), Some("Connection refused"));
    }

    #[test]
    fn test_connection_config_defaults() {
        let config = GraphConnectionConfig::default();
        assert_eq!(config.uri, "bolt://localhost:7687");
        assert_eq!(config.max_connections, 16);
    }
}
