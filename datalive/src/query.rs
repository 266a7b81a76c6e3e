//! Request and response shapes of the query pipeline

use std::collections::BTreeMap;
use std::fmt;

use datalive_kg::{CacheContext, CacheMatch, QueryType, Relationship, TimelineEvent, Trend};
use serde::{Deserialize, Serialize};

use crate::error::{QueryError, Result};
use crate::planner::QueryStrategy;
use crate::services::{DocumentHit, SearchFilters};

/// Retrieval source run by the combiner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rag,
    Kag,
    Temporal,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::Rag, SourceKind::Kag, SourceKind::Temporal];

    /// Label reported in `strategies_used`
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Rag => "RAG",
            SourceKind::Kag => "KAG",
            SourceKind::Temporal => "KAG-Temporal",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Rag => "rag",
            SourceKind::Kag => "kag",
            SourceKind::Temporal => "temporal",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    pub text: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Free-form caller context forwarded to the planner
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    /// Overrides the cache tier derived from the strategies that ran
    #[serde(default)]
    pub query_type: Option<QueryType>,
}

fn default_true() -> bool {
    true
}

impl QueryRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            use_cache: true,
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_query_type(mut self, query_type: QueryType) -> Self {
        self.query_type = Some(query_type);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn cache_context(&self) -> CacheContext {
        CacheContext {
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
        }
    }

    /// Reject requests that cannot be processed at all
    pub fn validate(&self, max_query_length: usize) -> Result<()> {
        let text = self.text.trim();
        if text.is_empty() {
            return Err(QueryError::InvalidRequest("query text is empty".to_string()));
        }
        if text.chars().count() > max_query_length {
            return Err(QueryError::InvalidRequest(format!(
                "query exceeds {} characters",
                max_query_length
            )));
        }
        Ok(())
    }
}

/// One piece of evidence behind an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Source {
    Document(DocumentHit),
    Relationship(Relationship),
    Temporal(TimelineEvent),
}

impl Source {
    pub fn kind(&self) -> SourceKind {
        match self {
            Source::Document(_) => SourceKind::Rag,
            Source::Relationship(_) => SourceKind::Kag,
            Source::Temporal(_) => SourceKind::Temporal,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<QueryStrategy>,
    /// Items returned per source that ran
    #[serde(default)]
    pub result_counts: BTreeMap<SourceKind, usize>,
    /// Error text per source that failed
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<SourceKind, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insights: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trends: Vec<Trend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_type: Option<QueryType>,
    /// How a cached response was found
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    /// Always within [0, 1]
    pub confidence: f64,
    pub strategies_used: Vec<String>,
    pub processing_time_seconds: f64,
    pub cached: bool,
    pub metadata: ResponseMetadata,
}

/// The part of a response kept in the answer cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnswer {
    pub answer: String,
    pub sources: Vec<Source>,
    pub confidence: f64,
    pub strategies_used: Vec<String>,
    pub metadata: ResponseMetadata,
}

impl From<&QueryResponse> for CachedAnswer {
    fn from(response: &QueryResponse) -> Self {
        Self {
            answer: response.answer.clone(),
            sources: response.sources.clone(),
            confidence: response.confidence,
            strategies_used: response.strategies_used.clone(),
            metadata: response.metadata.clone(),
        }
    }
}

impl CachedAnswer {
    pub fn into_response(self, cache: Option<CacheMatch>) -> QueryResponse {
        let strategies_used = if self.strategies_used.is_empty() {
            vec!["CACHE".to_string()]
        } else {
            self.strategies_used
        };

        QueryResponse {
            answer: self.answer,
            sources: self.sources,
            confidence: self.confidence,
            strategies_used,
            processing_time_seconds: 0.0,
            cached: true,
            metadata: ResponseMetadata {
                cache,
                ..self.metadata
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(QueryRequest::new("What is DataLive?").validate(100).is_ok());
        assert_eq!(
            QueryRequest::new("   ").validate(100),
            Err(QueryError::InvalidRequest("query text is empty".to_string()))
        );
        assert!(QueryRequest::new("x".repeat(101)).validate(100).is_err());
    }

    #[test]
    fn test_source_serializes_with_type_tag() {
        let source = Source::Relationship(Relationship {
            source: "DataLive".into(),
            target: "Neo4j".into(),
            relationship_type: "USES".into(),
            confidence: 0.9,
            properties: BTreeMap::new(),
        });

        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["type"], "relationship");
        assert_eq!(json["payload"]["target"], "Neo4j");

        let back: Source = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), SourceKind::Kag);
    }

    #[test]
    fn test_request_defaults_to_cache() {
        let request: QueryRequest = serde_json::from_str(r#"{"text": "hi"}"#).unwrap();
        assert!(request.use_cache);
        assert!(request.filters.is_empty());
    }

    #[test]
    fn test_cached_answer_response_is_marked() {
        let answer = CachedAnswer {
            answer: "A platform".into(),
            sources: vec![],
            confidence: 0.95,
            strategies_used: vec![],
            metadata: ResponseMetadata::default(),
        };
        let response = answer.into_response(None);
        assert!(response.cached);
        assert_eq!(response.processing_time_seconds, 0.0);
        assert_eq!(response.strategies_used, vec!["CACHE".to_string()]);
    }
}
