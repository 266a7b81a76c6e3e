//! # DataLive
//!
//! Query orchestration over documents, a knowledge graph and an answer cache.
//!
//! A query goes through [`ResultCombiner::process_query`]: the adaptive cache
//! is probed first, then [`StrategyPlanner`] picks the retrieval sources,
//! semantic, graph and temporal search run concurrently, and the merged
//! evidence is turned into an answer by the completion service.
//!
//! ```rust,no_run
//! use datalive::{QueryRequest, ResultCombiner};
//!
//! # async fn example(combiner: ResultCombiner) -> anyhow::Result<()> {
//! let response = combiner
//!     .process_query(QueryRequest::new("What is DataLive?").with_user("42"))
//!     .await?;
//! println!("{} ({:?})", response.answer, response.strategies_used);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cli;
pub mod combiner;
pub mod config;
pub mod error;
pub mod metrics;
pub mod planner;
pub mod query;
pub mod search;
pub mod services;

pub use api::{ApiServer, AppState, AuthState, JwtAuth};
pub use cli::{CliCompletion, Model};
pub use combiner::{CombinerConfig, ResultCombiner};
pub use config::{CacheBackend, Settings};
pub use error::{QueryError, Result};
pub use metrics::{MetricsReporter, MetricsSummary, QueryMetrics, QueryOutcome, TracingMetrics};
pub use planner::{QueryStrategy, StrategyPlanner};
pub use query::{CachedAnswer, QueryRequest, QueryResponse, ResponseMetadata, Source, SourceKind};
pub use search::{DocumentType, FastEmbedder, SearchDocument, VectorSearch};
pub use services::{CompletionService, DocumentHit, SearchFilters, SemanticSearch};
