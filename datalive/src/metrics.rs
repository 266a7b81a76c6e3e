//! Query pipeline metrics
//!
//! The combiner reports to a [`MetricsReporter`] handed to it at
//! construction. [`QueryMetrics`] keeps in-process counters for the
//! `/api/v1/metrics/summary` endpoint; [`TracingMetrics`] only logs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use datalive_kg::CacheMatch;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::planner::QueryStrategy;
use crate::query::SourceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryOutcome {
    Success,
    Cached,
    Rejected,
    Cancelled,
}

pub trait MetricsReporter: Send + Sync {
    fn cache_hit(&self, matched: Option<&CacheMatch>);
    fn cache_miss(&self);
    fn strategy_chosen(&self, strategy: &QueryStrategy);
    fn source_used(&self, source: SourceKind);
    fn source_failed(&self, source: SourceKind, error: &str);
    fn query_finished(&self, outcome: QueryOutcome, elapsed: Duration);
}

/// Logs every event and keeps nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsReporter for TracingMetrics {
    fn cache_hit(&self, matched: Option<&CacheMatch>) {
        match matched {
            Some(CacheMatch::Similar { similarity, .. }) => {
                info!("Cache hit (similarity {:.3})", similarity)
            }
            Some(CacheMatch::Key { key }) => info!("Cache hit on {}", key),
            None => info!("Cache hit"),
        }
    }

    fn cache_miss(&self) {
        debug!("Cache miss");
    }

    fn strategy_chosen(&self, strategy: &QueryStrategy) {
        info!(
            "Strategy chosen: rag={} kag={} temporal={}",
            strategy.use_rag, strategy.use_kag, strategy.use_temporal
        );
    }

    fn source_used(&self, source: SourceKind) {
        debug!("Source used: {}", source);
    }

    fn source_failed(&self, source: SourceKind, error: &str) {
        warn!("Source {} failed: {}", source, error);
    }

    fn query_finished(&self, outcome: QueryOutcome, elapsed: Duration) {
        info!("Query finished ({:?}) in {:.3}s", outcome, elapsed.as_secs_f64());
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceSummary {
    pub used: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub queries: BTreeMap<String, u64>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Percentage of cache probes that hit
    pub cache_hit_rate: f64,
    pub similarity_hits: u64,
    pub sources: BTreeMap<SourceKind, SourceSummary>,
    pub fallback_strategies: u64,
    pub average_processing_seconds: f64,
}

#[derive(Default)]
struct Counters {
    success: AtomicU64,
    cached: AtomicU64,
    rejected: AtomicU64,
    cancelled: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    similarity_hits: AtomicU64,
    fallback_strategies: AtomicU64,
    processing_micros: AtomicU64,
}

/// In-process counters, logged like [`TracingMetrics`]
#[derive(Default)]
pub struct QueryMetrics {
    counters: Counters,
    sources: Mutex<BTreeMap<SourceKind, SourceSummary>>,
}

impl QueryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_sources<F: FnOnce(&mut BTreeMap<SourceKind, SourceSummary>)>(&self, f: F) {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut sources);
    }

    pub fn summary(&self) -> MetricsSummary {
        let c = &self.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        let hits = load(&c.cache_hits);
        let misses = load(&c.cache_misses);
        let probes = hits + misses;
        let cache_hit_rate = if probes == 0 {
            0.0
        } else {
            hits as f64 / probes as f64 * 100.0
        };

        let mut queries = BTreeMap::new();
        queries.insert("success".to_string(), load(&c.success));
        queries.insert("cached".to_string(), load(&c.cached));
        queries.insert("rejected".to_string(), load(&c.rejected));
        queries.insert("cancelled".to_string(), load(&c.cancelled));

        let timed = load(&c.success);
        let average_processing_seconds = if timed == 0 {
            0.0
        } else {
            load(&c.processing_micros) as f64 / timed as f64 / 1_000_000.0
        };

        MetricsSummary {
            queries,
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_rate,
            similarity_hits: load(&c.similarity_hits),
            sources: self.sources.lock().unwrap_or_else(|e| e.into_inner()).clone(),
            fallback_strategies: load(&c.fallback_strategies),
            average_processing_seconds,
        }
    }
}

impl MetricsReporter for QueryMetrics {
    fn cache_hit(&self, matched: Option<&CacheMatch>) {
        self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        if matches!(matched, Some(CacheMatch::Similar { .. })) {
            self.counters.similarity_hits.fetch_add(1, Ordering::Relaxed);
        }
        TracingMetrics.cache_hit(matched);
    }

    fn cache_miss(&self) {
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        TracingMetrics.cache_miss();
    }

    fn strategy_chosen(&self, strategy: &QueryStrategy) {
        if strategy.is_fallback() {
            self.counters.fallback_strategies.fetch_add(1, Ordering::Relaxed);
        }
        TracingMetrics.strategy_chosen(strategy);
    }

    fn source_used(&self, source: SourceKind) {
        self.with_sources(|s| s.entry(source).or_default().used += 1);
        TracingMetrics.source_used(source);
    }

    fn source_failed(&self, source: SourceKind, error: &str) {
        self.with_sources(|s| s.entry(source).or_default().failed += 1);
        TracingMetrics.source_failed(source, error);
    }

    fn query_finished(&self, outcome: QueryOutcome, elapsed: Duration) {
        let counter = match outcome {
            QueryOutcome::Success => {
                self.counters
                    .processing_micros
                    .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
                &self.counters.success
            }
            QueryOutcome::Cached => &self.counters.cached,
            QueryOutcome::Rejected => &self.counters.rejected,
            QueryOutcome::Cancelled => &self.counters.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        TracingMetrics.query_finished(outcome, elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let metrics = QueryMetrics::new();

        metrics.cache_miss();
        metrics.strategy_chosen(&QueryStrategy::default());
        metrics.source_used(SourceKind::Rag);
        metrics.source_used(SourceKind::Kag);
        metrics.source_failed(SourceKind::Kag, "connection refused");
        metrics.query_finished(QueryOutcome::Success, Duration::from_millis(500));

        metrics.cache_hit(Some(&CacheMatch::Similar {
            similarity: 0.9,
            original_query: "q".into(),
        }));
        metrics.query_finished(QueryOutcome::Cached, Duration::ZERO);

        let summary = metrics.summary();
        assert_eq!(summary.queries["success"], 1);
        assert_eq!(summary.queries["cached"], 1);
        assert_eq!(summary.cache_hits, 1);
        assert_eq!(summary.similarity_hits, 1);
        assert_eq!(summary.cache_hit_rate, 50.0);
        assert_eq!(summary.fallback_strategies, 1);
        assert_eq!(summary.sources[&SourceKind::Kag].failed, 1);
        assert_eq!(summary.sources[&SourceKind::Rag].used, 1);
        assert!((summary.average_processing_seconds - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_summary() {
        let summary = QueryMetrics::new().summary();
        assert_eq!(summary.cache_hit_rate, 0.0);
        assert_eq!(summary.average_processing_seconds, 0.0);
    }
}
