//! Core type definitions for the cache system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Cache key type
pub type CacheKey = String;

/// Query category, selects the TTL tier of a cached answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// Stable facts, longest TTL
    Factual,
    /// Multi-source analysis
    Analytical,
    /// Time-sensitive answers
    Temporal,
    /// User-specific answers, shortest TTL
    Personal,
    General,
}

impl QueryType {
    pub const ALL: [QueryType; 5] = [
        QueryType::Factual,
        QueryType::Analytical,
        QueryType::Temporal,
        QueryType::Personal,
        QueryType::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Factual => "factual",
            QueryType::Analytical => "analytical",
            QueryType::Temporal => "temporal",
            QueryType::Personal => "personal",
            QueryType::General => "general",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "factual" => Ok(QueryType::Factual),
            "analytical" => Ok(QueryType::Analytical),
            "temporal" => Ok(QueryType::Temporal),
            "personal" => Ok(QueryType::Personal),
            "general" => Ok(QueryType::General),
            other => Err(format!("unknown query type: {}", other)),
        }
    }
}

/// Caller identity used to scope cache keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheContext {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl CacheContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// How a lookup resolved to a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheMatch {
    /// Direct hit on one of the probed keys
    Key { key: CacheKey },
    /// Embedding similarity against a previously indexed query
    Similar {
        similarity: f32,
        original_query: String,
    },
}

/// A cached answer as written to the key-value store
///
/// `ttl_seconds` is fixed when the record is written; later configuration
/// changes never alter it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord<T> {
    /// Every key this record was written under
    pub keys: Vec<CacheKey>,
    pub query: String,
    pub result: T,
    pub query_type: QueryType,
    pub cached_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Set on lookup, never persisted
    #[serde(skip)]
    pub matched: Option<CacheMatch>,
}

impl<T> CacheRecord<T> {
    /// `now - cached_at < ttl_seconds`
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.cached_at);
        age < chrono::Duration::seconds(self.ttl_seconds as i64)
    }

    /// Seconds elapsed since the record was written
    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        now.signed_duration_since(self.cached_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Memory accounting reported by a key-value store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub used_bytes: usize,
    pub peak_bytes: usize,
    pub entries: usize,
}

/// Snapshot of cache contents and lookup counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Key counts by namespace (`exact`, `normalized`, ...)
    pub namespaces: BTreeMap<String, usize>,

    pub memory: MemoryUsage,

    /// Lookups answered from a probed key
    pub hits: u64,

    /// Lookups answered through embedding similarity
    pub similarity_hits: u64,

    pub misses: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits + self.similarity_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }

    /// Total keys across all namespaces
    pub fn total_keys(&self) -> usize {
        self.namespaces.values().sum()
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ keys: {}, hits: {}, similarity_hits: {}, misses: {}, hit_rate: {:.2}%, memory: {} bytes (peak {}) }}",
            self.total_keys(),
            self.hits,
            self.similarity_hits,
            self.misses,
            self.hit_rate(),
            self.memory.used_bytes,
            self.memory.peak_bytes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ttl_seconds: u64, cached_at: DateTime<Utc>) -> CacheRecord<String> {
        CacheRecord {
            keys: vec!["exact:abc".to_string()],
            query: "q".to_string(),
            result: "answer".to_string(),
            query_type: QueryType::Factual,
            cached_at,
            ttl_seconds,
            confidence: 0.95,
            embedding: None,
            matched: None,
        }
    }

    #[test]
    fn test_record_freshness_boundary() {
        let t0 = Utc::now();
        let rec = record(10, t0);
        assert!(rec.is_fresh(t0 + chrono::Duration::seconds(9)));
        assert!(!rec.is_fresh(t0 + chrono::Duration::seconds(10)));
        assert!(!rec.is_fresh(t0 + chrono::Duration::seconds(11)));
    }

    #[test]
    fn test_matched_is_not_persisted() {
        let mut rec = record(10, Utc::now());
        rec.matched = Some(CacheMatch::Key {
            key: "exact:abc".to_string(),
        });
        let json = serde_json::to_string(&rec).unwrap();
        assert!(!json.contains("matched"));
        let back: CacheRecord<String> = serde_json::from_str(&json).unwrap();
        assert!(back.matched.is_none());
        assert_eq!(back.ttl_seconds, 10);
    }

    #[test]
    fn test_query_type_parse_and_display() {
        for qt in QueryType::ALL {
            assert_eq!(qt.as_str().parse::<QueryType>().unwrap(), qt);
        }
        assert!("weird".parse::<QueryType>().is_err());
        assert_eq!(
            serde_json::to_string(&QueryType::Analytical).unwrap(),
            "\"analytical\""
        );
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 6,
            similarity_hits: 2,
            misses: 2,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 80.0);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_cache_stats_display() {
        let mut stats = CacheStats::default();
        stats.namespaces.insert("exact".to_string(), 3);
        stats.namespaces.insert("user".to_string(), 1);
        let display = stats.to_string();
        assert!(display.contains("keys: 4"));
    }
}
