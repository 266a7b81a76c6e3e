//! Configuration for the adaptive cache

use crate::cache::types::QueryType;
use crate::error::{KgError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Time-to-live per query type
///
/// Factual answers live longest, personal answers shortest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtlTable {
    pub factual: Duration,
    pub analytical: Duration,
    pub temporal: Duration,
    pub personal: Duration,
    pub general: Duration,
}

impl Default for TtlTable {
    fn default() -> Self {
        Self {
            factual: Duration::from_secs(3600),
            analytical: Duration::from_secs(1800),
            temporal: Duration::from_secs(900),
            personal: Duration::from_secs(300),
            general: Duration::from_secs(3600),
        }
    }
}

impl TtlTable {
    pub fn ttl_for(&self, query_type: QueryType) -> Duration {
        match query_type {
            QueryType::Factual => self.factual,
            QueryType::Analytical => self.analytical,
            QueryType::Temporal => self.temporal,
            QueryType::Personal => self.personal,
            QueryType::General => self.general,
        }
    }

    fn iter(&self) -> impl Iterator<Item = (QueryType, Duration)> + '_ {
        QueryType::ALL.into_iter().map(move |qt| (qt, self.ttl_for(qt)))
    }
}

/// Configuration for the adaptive cache and its store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL tier per query type
    pub ttl: TtlTable,

    /// TTL of embedding index entries, never shorter than the analytical tier
    pub embedding_index_ttl: Duration,

    /// Minimum cosine similarity for a fuzzy hit (0.0 - 1.0)
    pub similarity_threshold: f32,

    /// How many of the most recent embeddings a similarity lookup scans
    pub similarity_scan_limit: usize,

    /// How many embedding index keys are remembered for scanning
    pub embedding_index_capacity: usize,

    /// TTL jitter factor (0.0 - 1.0), applied once at write time
    pub ttl_jitter: f64,

    /// Maximum number of keys held by the store
    pub max_entries: usize,

    /// Maximum total size of stored keys and values in bytes
    pub max_size_bytes: usize,

    /// Enable the background expiry sweep of the store
    pub enable_auto_cleanup: bool,

    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: TtlTable::default(),
            embedding_index_ttl: Duration::from_secs(1800),
            similarity_threshold: 0.85,
            similarity_scan_limit: 50,
            embedding_index_capacity: 1_000,
            ttl_jitter: 0.0,
            max_entries: 10_000,
            // 100 MB
            max_size_bytes: 100 * 1024 * 1024,
            enable_auto_cleanup: true,
            // Sweep every 5 minutes
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Defaults overridden by `CACHE_TTL_*`, `CACHE_MAX_SIZE` and
    /// `CACHE_SIMILARITY_THRESHOLD` from the environment or a `.env` file
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = Self::default();

        let ttl_vars = [
            ("CACHE_TTL_FACTUAL", &mut config.ttl.factual),
            ("CACHE_TTL_ANALYTICAL", &mut config.ttl.analytical),
            ("CACHE_TTL_TEMPORAL", &mut config.ttl.temporal),
            ("CACHE_TTL_PERSONAL", &mut config.ttl.personal),
            ("CACHE_TTL_GENERAL", &mut config.ttl.general),
        ];
        for (var, slot) in ttl_vars {
            if let Some(secs) = env_parse::<u64>(var)? {
                *slot = Duration::from_secs(secs);
            }
        }

        if let Some(max) = env_parse::<usize>("CACHE_MAX_SIZE")? {
            config.max_entries = max;
        }
        if let Some(threshold) = env_parse::<f32>("CACHE_SIMILARITY_THRESHOLD")? {
            config.similarity_threshold = threshold;
        }

        config.embedding_index_ttl = config.embedding_index_ttl.max(config.ttl.analytical);
        config.validate().map_err(KgError::ConfigError)?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some((qt, _)) = self.ttl.iter().find(|(_, ttl)| ttl.is_zero()) {
            return Err(format!("ttl for {} must be greater than 0", qt));
        }

        if self.embedding_index_ttl < self.ttl.analytical {
            return Err("embedding_index_ttl must be at least the analytical ttl".to_string());
        }

        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err("similarity_threshold must be between 0.0 and 1.0".to_string());
        }

        if self.similarity_scan_limit == 0 {
            return Err("similarity_scan_limit must be greater than 0".to_string());
        }

        if self.embedding_index_capacity < self.similarity_scan_limit {
            return Err(
                "embedding_index_capacity must be at least similarity_scan_limit".to_string(),
            );
        }

        if self.ttl_jitter < 0.0 || self.ttl_jitter > 1.0 {
            return Err("ttl_jitter must be between 0.0 and 1.0".to_string());
        }

        if self.max_entries == 0 {
            return Err("max_entries must be greater than 0".to_string());
        }

        if self.max_size_bytes == 0 {
            return Err("max_size_bytes must be greater than 0".to_string());
        }

        Ok(())
    }

    /// TTL tier for a query type, without jitter
    pub fn ttl_for(&self, query_type: QueryType) -> Duration {
        self.ttl.ttl_for(query_type)
    }

    /// TTL for a new record of the given type with jitter applied
    pub fn ttl_with_jitter(&self, query_type: QueryType) -> Duration {
        let base = self.ttl_for(query_type);
        if self.ttl_jitter == 0.0 {
            return base;
        }

        let base_secs = base.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(1.0);

        Duration::from_secs(final_secs.round() as u64)
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Result<Option<T>> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| KgError::ConfigError(format!("{} has an invalid value: {}", var, raw))),
        Err(_) => Ok(None),
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    ttl: Option<TtlTable>,
    overrides: Vec<(QueryType, Duration)>,
    embedding_index_ttl: Option<Duration>,
    similarity_threshold: Option<f32>,
    similarity_scan_limit: Option<usize>,
    embedding_index_capacity: Option<usize>,
    ttl_jitter: Option<f64>,
    max_entries: Option<usize>,
    max_size_bytes: Option<usize>,
    enable_auto_cleanup: Option<bool>,
    cleanup_interval: Option<Duration>,
}

impl CacheConfigBuilder {
    /// Replace the whole TTL table
    pub fn ttl_table(mut self, table: TtlTable) -> Self {
        self.ttl = Some(table);
        self
    }

    /// Override the TTL of a single query type
    pub fn ttl(mut self, query_type: QueryType, ttl: Duration) -> Self {
        self.overrides.push((query_type, ttl));
        self
    }

    pub fn embedding_index_ttl(mut self, ttl: Duration) -> Self {
        self.embedding_index_ttl = Some(ttl);
        self
    }

    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }

    pub fn similarity_scan_limit(mut self, limit: usize) -> Self {
        self.similarity_scan_limit = Some(limit);
        self
    }

    pub fn embedding_index_capacity(mut self, capacity: usize) -> Self {
        self.embedding_index_capacity = Some(capacity);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    pub fn max_size_bytes(mut self, size: usize) -> Self {
        self.max_size_bytes = Some(size);
        self
    }

    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.enable_auto_cleanup = Some(enable);
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Build the cache configuration
    ///
    /// The embedding index TTL is raised to the analytical tier when needed.
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        let mut ttl = self.ttl.unwrap_or(defaults.ttl);
        for (query_type, value) in self.overrides {
            match query_type {
                QueryType::Factual => ttl.factual = value,
                QueryType::Analytical => ttl.analytical = value,
                QueryType::Temporal => ttl.temporal = value,
                QueryType::Personal => ttl.personal = value,
                QueryType::General => ttl.general = value,
            }
        }

        let embedding_index_ttl = self
            .embedding_index_ttl
            .unwrap_or(defaults.embedding_index_ttl)
            .max(ttl.analytical);

        CacheConfig {
            ttl,
            embedding_index_ttl,
            similarity_threshold: self
                .similarity_threshold
                .unwrap_or(defaults.similarity_threshold),
            similarity_scan_limit: self
                .similarity_scan_limit
                .unwrap_or(defaults.similarity_scan_limit),
            embedding_index_capacity: self
                .embedding_index_capacity
                .unwrap_or(defaults.embedding_index_capacity),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            max_entries: self.max_entries.unwrap_or(defaults.max_entries),
            max_size_bytes: self.max_size_bytes.unwrap_or(defaults.max_size_bytes),
            enable_auto_cleanup: self
                .enable_auto_cleanup
                .unwrap_or(defaults.enable_auto_cleanup),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
        }
    }
}

/// Preset configurations for common deployments
impl CacheConfig {
    /// Rapidly changing sources: every tier divided by four
    pub fn realtime() -> Self {
        let base = TtlTable::default();
        let quarter = |d: Duration| d / 4;
        Self {
            ttl: TtlTable {
                factual: quarter(base.factual),
                analytical: quarter(base.analytical),
                temporal: quarter(base.temporal),
                personal: quarter(base.personal),
                general: quarter(base.general),
            },
            embedding_index_ttl: quarter(base.analytical),
            similarity_threshold: 0.92,
            ttl_jitter: 0.10,
            ..Default::default()
        }
    }

    /// Reference material that rarely changes
    pub fn static_content() -> Self {
        Self {
            ttl: TtlTable {
                factual: Duration::from_secs(24 * 3600),
                analytical: Duration::from_secs(6 * 3600),
                temporal: Duration::from_secs(3600),
                personal: Duration::from_secs(1800),
                general: Duration::from_secs(12 * 3600),
            },
            embedding_index_ttl: Duration::from_secs(24 * 3600),
            max_entries: 100_000,
            // 1 GB
            max_size_bytes: 1024 * 1024 * 1024,
            ttl_jitter: 0.05,
            ..Default::default()
        }
    }

    /// Configuration for memory-constrained environments
    pub fn small() -> Self {
        Self {
            similarity_scan_limit: 20,
            embedding_index_capacity: 100,
            max_entries: 1_000,
            // 10 MB
            max_size_bytes: 10 * 1024 * 1024,
            ..Default::default()
        }
    }
}
