//! Collaborator seams consumed by the planner and the combiner
//!
//! Embedding, graph and temporal search are defined next to the cache and
//! graph code in `datalive-kg`; the text-completion and semantic-search seams
//! live here with the service that drives them.

use async_trait::async_trait;
use datalive_kg::Result;
use serde::{Deserialize, Serialize};

/// Free-form text completion
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// One passage returned by semantic retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentHit {
    pub id: String,
    pub title: String,
    pub content: String,
    /// Similarity in [0, 1], higher is closer
    pub score: f32,
    /// Where the document came from (file path, URL, ...)
    pub source: String,
    pub document_type: String,
}

/// Optional restrictions applied by semantic retrieval
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.document_type.is_none() && self.source.is_none()
    }
}

/// Embedding-based document retrieval
#[async_trait]
pub trait SemanticSearch: Send + Sync {
    /// Hits scoring at least `threshold`, best first, at most `limit`
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<DocumentHit>>;
}
