//! Error types for the cache and knowledge-graph layers
//!
//! Every collaborator trait in this crate returns [`Result`], so callers can
//! decide per call site whether a failure degrades the answer or aborts it.

use thiserror::Error;

/// Main error type for cache, embedding and graph operations
#[derive(Error, Debug)]
pub enum KgError {
    /// Connection error - network or connection pool issues
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Query execution error
    #[error("Query error: {0}")]
    QueryError(String),

    /// Operation timeout
    #[error("Operation timed out after {timeout_seconds}s: {context}")]
    TimeoutError {
        timeout_seconds: u64,
        context: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Key-value store failure (read, write or pattern scan)
    #[error("Cache store error: {0}")]
    StoreError(String),

    /// Embedding provider failure
    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    /// Text completion provider failure
    #[error("Completion error: {0}")]
    CompletionError(String),

    /// Neo4rs driver error (wrapper)
    #[error("Neo4rs driver error: {0}")]
    DriverError(#[from] neo4rs::Error),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, KgError>;

impl KgError {
    /// True when the failure means the backend could not be reached at all
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            KgError::ConnectionError(_) | KgError::TimeoutError { .. }
        )
    }
}

impl From<serde_json::Error> for KgError {
    fn from(e: serde_json::Error) -> Self {
        KgError::SerializationError(e.to_string())
    }
}

impl From<glob::PatternError> for KgError {
    fn from(e: glob::PatternError) -> Self {
        KgError::StoreError(format!("invalid key pattern: {}", e))
    }
}

impl From<rusqlite::Error> for KgError {
    fn from(e: rusqlite::Error) -> Self {
        KgError::StoreError(format!("sqlite: {}", e))
    }
}

impl From<String> for KgError {
    fn from(s: String) -> Self {
        KgError::Other(s)
    }
}

impl From<&str> for KgError {
    fn from(s: &str) -> Self {
        KgError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = KgError::ConnectionError("Failed to connect".to_string());
        assert_eq!(error.to_string(), "Connection error: Failed to connect");

        let timeout_error = KgError::TimeoutError {
            timeout_seconds: 5,
            context: "health check".to_string(),
        };
        assert!(timeout_error.to_string().contains("timed out after 5s"));

        let store_error = KgError::StoreError("redis gone".to_string());
        assert_eq!(store_error.to_string(), "Cache store error: redis gone");
    }

    #[test]
    fn test_error_conversion() {
        let error: KgError = "test error".into();
        assert!(matches!(error, KgError::Other(_)));

        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: KgError = json_err.into();
        assert!(matches!(error, KgError::SerializationError(_)));

        let pattern_err = glob::Pattern::new("user:[").unwrap_err();
        let error: KgError = pattern_err.into();
        assert!(matches!(error, KgError::StoreError(_)));
    }

    #[test]
    fn test_unavailable_classification() {
        assert!(KgError::ConnectionError("down".into()).is_unavailable());
        assert!(KgError::TimeoutError {
            timeout_seconds: 1,
            context: "graph".into()
        }
        .is_unavailable());
        assert!(!KgError::QueryError("bad cypher".into()).is_unavailable());
    }
}
