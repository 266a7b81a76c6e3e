//! # DataLive Knowledge Layer (datalive-kg)
//!
//! Building blocks shared by the DataLive query service:
//!
//! - [`cache`]: the adaptive answer cache (multi-key probing, per-type TTL,
//!   embedding similarity fallback, pattern invalidation) over a pluggable
//!   [`KeyValueStore`]
//! - [`graph`]: relationship and temporal retrieval over a Neo4j knowledge
//!   graph, with derived insights and trends
//! - [`connection`]: the Neo4j connection pool and three-tier health checks
//!
//! Collaborators are traits ([`EmbeddingService`], [`GraphSearch`],
//! [`TemporalSearch`], [`KeyValueStore`]) so the service wires concrete
//! backends at startup and tests substitute fakes.
//!
//! ## Health checks
//!
//! ```no_run
//! use datalive_kg::{GraphConnectionConfig, HealthCheckConfig, Neo4jClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = GraphConnectionConfig::from_env();
//!     let client = Neo4jClient::connect(&config, HealthCheckConfig::default()).await?;
//!
//!     let result = client.health_check_with_retry().await;
//!     if result.status.is_operational() {
//!         println!("Knowledge graph is operational ({}ms)", result.response_time_ms);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Relationship search
//!
//! ```no_run
//! use datalive_kg::{GraphSearch, Neo4jClient, Neo4jKnowledgeGraph};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Neo4jClient::new("bolt://localhost:7687", "neo4j", "password", "neo4j").await?;
//!     let graph = Neo4jKnowledgeGraph::new(Arc::new(client));
//!
//!     let analysis = graph.analyze_relationships("DataLive", 2, 20).await?;
//!     for insight in &analysis.insights {
//!         println!("{}", insight);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod connection;
pub mod error;
pub mod graph;

// Re-export main types for convenience
pub use cache::{
    AdaptiveCache, CacheConfig, CacheConfigBuilder, CacheContext, CacheKey, CacheMatch,
    CacheRecord, CacheStats, Clock, EmbeddingService, KeyValueStore, ManualClock, MemoryStore,
    MemoryUsage, QueryType, SqliteStore, SystemClock,
};
pub use connection::{
    GraphConnectionConfig, HealthCheckConfig, HealthCheckMethod, HealthCheckResult, HealthStatus,
    Neo4jClient,
};
pub use error::{KgError, Result};
pub use graph::{
    Entity, GraphAnalysis, GraphSearch, Neo4jKnowledgeGraph, OfflineGraph, Relationship,
    TemporalAnalysis, TemporalSearch, TimeRange, TimelineEvent, Trend, TrendKind,
};
