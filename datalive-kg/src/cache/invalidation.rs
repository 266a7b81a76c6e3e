//! Pattern invalidation and eviction bookkeeping

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Glob pattern over cache keys (`*`, `?`, `[...]`)
#[derive(Debug, Clone)]
pub struct KeyPattern {
    raw: String,
    pattern: glob::Pattern,
}

impl KeyPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        Ok(Self {
            raw: pattern.to_string(),
            pattern: glob::Pattern::new(pattern)?,
        })
    }

    /// Keys are matched literally, so `/` and `.` carry no special meaning
    pub fn matches(&self, key: &str) -> bool {
        self.pattern.matches_with(
            key,
            glob::MatchOptions {
                case_sensitive: true,
                require_literal_separator: false,
                require_literal_leading_dot: false,
            },
        )
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Reason a key left the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Entry expired based on TTL
    Expired,

    /// Removed by an explicit pattern
    Pattern { pattern: String },

    /// Evicted due to store size limits
    SizeLimit,

    /// The cached record was older than its recorded TTL
    Stale,

    /// The stored value could not be decoded
    Corrupt,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Expired => write!(f, "TTL expired"),
            InvalidationReason::Pattern { pattern } => write!(f, "pattern match: {}", pattern),
            InvalidationReason::SizeLimit => write!(f, "store size limit reached"),
            InvalidationReason::Stale => write!(f, "record stale"),
            InvalidationReason::Corrupt => write!(f, "undecodable record"),
        }
    }
}

/// Record of keys removed together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub reason: InvalidationReason,
    pub timestamp: DateTime<Utc>,
    pub keys: Vec<String>,
}

impl InvalidationEvent {
    pub fn new(reason: InvalidationReason, keys: Vec<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            reason,
            timestamp,
            keys,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
