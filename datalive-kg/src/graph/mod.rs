//! Knowledge-graph retrieval
//!
//! [`GraphSearch`] expands the entities named in a query into their
//! relationships; [`TemporalSearch`] collects dated events around them.
//! [`Neo4jKnowledgeGraph`] implements both against a Neo4j database.

pub mod insights;
pub mod neo4j;
pub mod types;

use crate::error::{KgError, Result};
use async_trait::async_trait;

pub use insights::{relationship_insights, timeline_trends};
pub use neo4j::Neo4jKnowledgeGraph;
pub use types::{
    Entity, GraphAnalysis, Relationship, TemporalAnalysis, TimeRange, TimelineEvent, Trend,
    TrendKind,
};

/// Relationship retrieval around the entities mentioned in a query
#[async_trait]
pub trait GraphSearch: Send + Sync {
    async fn analyze_relationships(
        &self,
        query: &str,
        max_depth: u32,
        limit: usize,
    ) -> Result<GraphAnalysis>;
}

/// Event retrieval within a time window
#[async_trait]
pub trait TemporalSearch: Send + Sync {
    async fn search(&self, query: &str, time_range: TimeRange) -> Result<TemporalAnalysis>;
}

/// Stand-in used when no graph database could be reached at startup
///
/// Every call fails with [`KgError::ConnectionError`].
#[derive(Debug, Clone)]
pub struct OfflineGraph {
    reason: String,
}

impl OfflineGraph {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn unavailable(&self) -> KgError {
        KgError::ConnectionError(format!("knowledge graph offline: {}", self.reason))
    }
}

#[async_trait]
impl GraphSearch for OfflineGraph {
    async fn analyze_relationships(&self, _: &str, _: u32, _: usize) -> Result<GraphAnalysis> {
        Err(self.unavailable())
    }
}

#[async_trait]
impl TemporalSearch for OfflineGraph {
    async fn search(&self, _: &str, _: TimeRange) -> Result<TemporalAnalysis> {
        Err(self.unavailable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_graph_reports_unavailable() {
        let graph = OfflineGraph::new("bolt://localhost:7687 refused");

        let err = graph.analyze_relationships("DataLive", 2, 10).await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("refused"));

        let err = TemporalSearch::search(&graph, "DataLive", TimeRange::LastMonth)
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }
}
