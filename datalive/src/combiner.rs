//! Request lifecycle: cache probe, planning, concurrent retrieval, merging,
//! answer synthesis and the deferred cache write
//!
//! Collaborator failures are contained here. A failing source contributes
//! nothing and is listed in the response metadata; a failing planner falls
//! back to semantic retrieval; a failing synthesis returns a fixed apology.
//! Only invalid or cancelled requests produce an error.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use datalive_kg::cache::KeyNamespace;
use datalive_kg::{
    AdaptiveCache, CacheMatch, CacheRecord, CacheStats, GraphAnalysis, GraphSearch, QueryType,
    TemporalAnalysis, TemporalSearch,
};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{QueryError, Result};
use crate::metrics::{MetricsReporter, QueryOutcome, TracingMetrics};
use crate::planner::{QueryStrategy, StrategyPlanner};
use crate::query::{
    CachedAnswer, QueryRequest, QueryResponse, ResponseMetadata, Source, SourceKind,
};
use crate::services::{CompletionService, DocumentHit, SemanticSearch};

pub const FALLBACK_ANSWER: &str =
    "I apologize, but I encountered an error while generating the answer. Please try again.";

/// Confidence when no source produced a signal
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Relationship count at which the graph signal saturates
const RELATIONSHIP_SATURATION: f64 = 10.0;
/// Event count at which the temporal signal saturates
const EVENT_SATURATION: f64 = 5.0;

/// Sources per category handed to answer synthesis
pub const MAX_SOURCES_PER_CATEGORY: usize = 5;
/// Context passages handed to answer synthesis
pub const MAX_CONTEXT_ITEMS: usize = 5;
const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct CombinerConfig {
    /// Fuzzy cache hits must be more confident than this to be served
    pub cache_confidence_threshold: f64,
    pub max_query_length: usize,
    /// Minimum semantic-search score
    pub vector_threshold: f32,
    /// Relationships requested from graph search
    pub graph_limit: usize,
    /// Master switch; requests cannot opt back in
    pub enable_caching: bool,
}

impl Default for CombinerConfig {
    fn default() -> Self {
        Self {
            cache_confidence_threshold: 0.9,
            max_query_length: 10_000,
            vector_threshold: 0.7,
            graph_limit: 20,
            enable_caching: true,
        }
    }
}

/// Raw outcome of each source, `None` when the strategy skipped it
struct Retrieval {
    rag: Option<datalive_kg::Result<Vec<DocumentHit>>>,
    kag: Option<datalive_kg::Result<GraphAnalysis>>,
    temporal: Option<datalive_kg::Result<TemporalAnalysis>>,
}

/// Successful source outputs, merged
#[derive(Default)]
struct Merged {
    documents: Vec<DocumentHit>,
    graph: Option<GraphAnalysis>,
    temporal: Option<TemporalAnalysis>,
    metadata: ResponseMetadata,
    strategies_used: Vec<String>,
}

impl Merged {
    fn ran(&self, kind: SourceKind) -> bool {
        self.strategies_used.iter().any(|s| s == kind.label())
    }

    fn sources(&self) -> Vec<Source> {
        let mut sources: Vec<Source> =
            self.documents.iter().cloned().map(Source::Document).collect();
        if let Some(ref graph) = self.graph {
            sources.extend(graph.relationships.iter().cloned().map(Source::Relationship));
        }
        if let Some(ref temporal) = self.temporal {
            sources.extend(temporal.timeline.iter().cloned().map(Source::Temporal));
        }
        sources
    }

    /// Per-category capped sources for the synthesis prompt
    fn prompt_sources(&self) -> Vec<Source> {
        let mut sources: Vec<Source> = self
            .documents
            .iter()
            .take(MAX_SOURCES_PER_CATEGORY)
            .cloned()
            .map(Source::Document)
            .collect();
        if let Some(ref graph) = self.graph {
            sources.extend(
                graph
                    .relationships
                    .iter()
                    .take(MAX_SOURCES_PER_CATEGORY)
                    .cloned()
                    .map(Source::Relationship),
            );
        }
        if let Some(ref temporal) = self.temporal {
            sources.extend(
                temporal
                    .timeline
                    .iter()
                    .take(MAX_SOURCES_PER_CATEGORY)
                    .cloned()
                    .map(Source::Temporal),
            );
        }
        sources
    }

    /// Document passages then graph insights, first few only
    fn context(&self) -> String {
        let insights = self.graph.iter().flat_map(|g| g.insights.iter());
        self.documents
            .iter()
            .map(|d| &d.content)
            .chain(insights)
            .filter(|text| !text.trim().is_empty())
            .take(MAX_CONTEXT_ITEMS)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn confidence(&self) -> f64 {
        let mut signals = Vec::new();

        if !self.documents.is_empty() {
            let total: f64 = self.documents.iter().map(|d| d.score as f64).sum();
            signals.push(total / self.documents.len() as f64);
        }
        if let Some(ref graph) = self.graph {
            signals.push((graph.relationships.len() as f64 / RELATIONSHIP_SATURATION).min(1.0));
        }
        if let Some(ref temporal) = self.temporal {
            signals.push((temporal.timeline.len() as f64 / EVENT_SATURATION).min(1.0));
        }

        if signals.is_empty() {
            return DEFAULT_CONFIDENCE;
        }
        let mean = signals.iter().sum::<f64>() / signals.len() as f64;
        if mean.is_finite() {
            mean.clamp(0.0, 1.0)
        } else {
            DEFAULT_CONFIDENCE
        }
    }

    /// Cache tier from the sources that contributed
    fn query_type(&self) -> QueryType {
        if self.ran(SourceKind::Temporal) {
            QueryType::Temporal
        } else if self.ran(SourceKind::Rag) && self.ran(SourceKind::Kag) {
            QueryType::Analytical
        } else if self.ran(SourceKind::Rag) {
            QueryType::Factual
        } else {
            QueryType::General
        }
    }
}

fn preview(content: &str) -> String {
    let head: String = content.chars().take(PREVIEW_CHARS).collect();
    format!("{}...", head)
}

/// Numbered source listing for the synthesis prompt
pub fn format_sources(sources: &[Source]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, source)| {
            let n = i + 1;
            match source {
                Source::Document(doc) => format!(
                    "[{}] Document: {}\n    Score: {:.2}\n    Content: {}",
                    n,
                    if doc.title.is_empty() { "Untitled" } else { &doc.title },
                    doc.score,
                    preview(&doc.content)
                ),
                Source::Relationship(rel) => format!(
                    "[{}] Relationship: {} --[{}]--> {}",
                    n, rel.source, rel.relationship_type, rel.target
                ),
                Source::Temporal(event) => format!(
                    "[{}] Event ({}): {}",
                    n,
                    event
                        .date
                        .map(|d| d.format("%Y-%m-%d").to_string())
                        .unwrap_or_else(|| "Unknown date".to_string()),
                    event.description
                ),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn answer_prompt(query: &str, context: &str, sources: &[Source]) -> String {
    format!(
        "Based on the following context and sources, provide a comprehensive answer to the user's query.\n\n\
         Query: {}\n\n\
         Context:\n{}\n\n\
         Sources:\n{}\n\n\
         Instructions:\n\
         1. Provide a clear, accurate answer based on the available information\n\
         2. Reference specific sources when making claims\n\
         3. If information is incomplete or uncertain, acknowledge this\n\
         4. Be concise but thorough\n\
         5. Use a professional, helpful tone\n\n\
         Answer:",
        query,
        context,
        format_sources(sources)
    )
}

pub struct ResultCombiner {
    cache: Arc<AdaptiveCache>,
    planner: StrategyPlanner,
    semantic: Arc<dyn SemanticSearch>,
    graph: Arc<dyn GraphSearch>,
    temporal: Arc<dyn TemporalSearch>,
    completion: Arc<dyn CompletionService>,
    metrics: Arc<dyn MetricsReporter>,
    config: CombinerConfig,
    pending_writes: Mutex<JoinSet<()>>,
}

impl ResultCombiner {
    pub fn new(
        cache: Arc<AdaptiveCache>,
        planner: StrategyPlanner,
        semantic: Arc<dyn SemanticSearch>,
        graph: Arc<dyn GraphSearch>,
        temporal: Arc<dyn TemporalSearch>,
        completion: Arc<dyn CompletionService>,
    ) -> Self {
        Self {
            cache,
            planner,
            semantic,
            graph,
            temporal,
            completion,
            metrics: Arc::new(TracingMetrics),
            config: CombinerConfig::default(),
            pending_writes: Mutex::new(JoinSet::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsReporter>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_config(mut self, config: CombinerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &CombinerConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<AdaptiveCache> {
        &self.cache
    }

    pub fn semantic(&self) -> &Arc<dyn SemanticSearch> {
        &self.semantic
    }

    pub fn graph(&self) -> &Arc<dyn GraphSearch> {
        &self.graph
    }

    pub fn temporal(&self) -> &Arc<dyn TemporalSearch> {
        &self.temporal
    }

    /// Answer a query, from the cache when possible
    pub async fn process_query(&self, request: QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();

        if let Err(e) = request.validate(self.config.max_query_length) {
            warn!("Rejected query: {}", e);
            self.metrics
                .query_finished(QueryOutcome::Rejected, started.elapsed());
            return Err(e);
        }

        let use_cache = request.use_cache && self.config.enable_caching;
        if use_cache {
            if let Some(response) = self.cached_response(&request).await {
                self.metrics
                    .query_finished(QueryOutcome::Cached, started.elapsed());
                return Ok(response);
            }
        }

        let strategy = self
            .planner
            .analyze(&request.text, request.context.as_ref())
            .await;
        self.metrics.strategy_chosen(&strategy);

        let retrieval = self.retrieve(&request, &strategy).await;
        let merged = self.merge(strategy, retrieval);

        let context = merged.context();
        let prompt_sources = merged.prompt_sources();
        let answer = self
            .synthesize(&request.text, &context, &prompt_sources)
            .await;

        let query_type = request.query_type.unwrap_or_else(|| merged.query_type());
        let confidence = merged.confidence();
        let sources = merged.sources();
        let mut metadata = merged.metadata;
        metadata.query_type = Some(query_type);

        let response = QueryResponse {
            answer,
            sources,
            confidence,
            strategies_used: merged.strategies_used,
            processing_time_seconds: started.elapsed().as_secs_f64(),
            cached: false,
            metadata,
        };

        info!(
            "Answered query with {:?} (confidence: {:.3}, {} sources)",
            response.strategies_used,
            response.confidence,
            response.sources.len()
        );

        if use_cache {
            self.schedule_cache_write(&request, &response, query_type)
                .await;
        }

        self.metrics
            .query_finished(QueryOutcome::Success, started.elapsed());
        Ok(response)
    }

    /// [`process_query`](Self::process_query) abandoned when `cancel` resolves first
    ///
    /// In-flight collaborator calls are dropped and no cache write is
    /// scheduled.
    pub async fn process_query_until<C>(&self, request: QueryRequest, cancel: C) -> Result<QueryResponse>
    where
        C: Future<Output = ()>,
    {
        let started = Instant::now();
        tokio::select! {
            biased;
            _ = cancel => {
                info!("Query cancelled after {:.3}s", started.elapsed().as_secs_f64());
                self.metrics.query_finished(QueryOutcome::Cancelled, started.elapsed());
                Err(QueryError::Cancelled)
            }
            result = self.process_query(request) => result,
        }
    }

    /// Cached response for a request, without running the pipeline
    ///
    /// Always `None` while caching is disabled.
    pub async fn check_cache(&self, request: &QueryRequest) -> Result<Option<QueryResponse>> {
        request.validate(self.config.max_query_length)?;
        if !self.config.enable_caching {
            return Ok(None);
        }
        Ok(self.cached_response(request).await)
    }

    pub async fn invalidate_cache_pattern(&self, pattern: &str) -> datalive_kg::Result<usize> {
        self.cache.invalidate(pattern).await
    }

    pub async fn cache_stats(&self) -> datalive_kg::Result<CacheStats> {
        self.cache.stats().await
    }

    /// Wait for every scheduled cache write to finish
    pub async fn flush_cache_writes(&self) {
        let mut writes = self.pending_writes.lock().await;
        while let Some(result) = writes.join_next().await {
            if let Err(e) = result {
                warn!("Cache write task failed: {}", e);
            }
        }
    }

    /// Deterministic key hits are served on freshness alone; fuzzy hits
    /// (semantic key or embedding similarity) also need high confidence
    fn passes_confidence_gate(&self, record: &CacheRecord<CachedAnswer>) -> bool {
        let fuzzy = match record.matched {
            Some(CacheMatch::Key { ref key }) => {
                key.starts_with(&format!("{}:", KeyNamespace::Semantic.prefix()))
            }
            Some(CacheMatch::Similar { .. }) | None => true,
        };
        !fuzzy || record.confidence > self.config.cache_confidence_threshold
    }

    async fn cached_response(&self, request: &QueryRequest) -> Option<QueryResponse> {
        let record: Option<CacheRecord<CachedAnswer>> = self
            .cache
            .lookup(&request.text, &request.cache_context())
            .await;

        match record {
            Some(record) if self.passes_confidence_gate(&record) => {
                self.metrics.cache_hit(record.matched.as_ref());
                Some(record.result.into_response(record.matched))
            }
            Some(record) => {
                debug!(
                    "Ignoring cached answer below confidence threshold ({:.3})",
                    record.confidence
                );
                self.metrics.cache_miss();
                None
            }
            None => {
                self.metrics.cache_miss();
                None
            }
        }
    }

    async fn retrieve(&self, request: &QueryRequest, strategy: &QueryStrategy) -> Retrieval {
        let text = request.text.as_str();

        let rag = async {
            if strategy.use_rag {
                self.metrics.source_used(SourceKind::Rag);
                Some(
                    self.semantic
                        .search(
                            text,
                            &request.filters,
                            strategy.rag_limit,
                            self.config.vector_threshold,
                        )
                        .await,
                )
            } else {
                None
            }
        };

        let kag = async {
            if strategy.use_kag {
                self.metrics.source_used(SourceKind::Kag);
                Some(
                    self.graph
                        .analyze_relationships(text, strategy.kg_depth, self.config.graph_limit)
                        .await,
                )
            } else {
                None
            }
        };

        let temporal = async {
            if strategy.use_temporal {
                self.metrics.source_used(SourceKind::Temporal);
                Some(
                    self.temporal
                        .search(text, strategy.effective_time_range())
                        .await,
                )
            } else {
                None
            }
        };

        let (rag, kag, temporal) = tokio::join!(rag, kag, temporal);
        Retrieval { rag, kag, temporal }
    }

    fn record_failure(&self, merged: &mut Merged, kind: SourceKind, e: &datalive_kg::KgError) {
        error!("{} retrieval failed: {}", kind.label(), e);
        self.metrics.source_failed(kind, &e.to_string());
        merged.metadata.failures.insert(kind, e.to_string());
    }

    fn merge(&self, strategy: QueryStrategy, retrieval: Retrieval) -> Merged {
        let mut merged = Merged::default();

        match retrieval.rag {
            Some(Ok(hits)) => {
                merged.strategies_used.push(SourceKind::Rag.label().to_string());
                merged.metadata.result_counts.insert(SourceKind::Rag, hits.len());
                merged.documents = hits;
            }
            Some(Err(e)) => self.record_failure(&mut merged, SourceKind::Rag, &e),
            None => {}
        }

        match retrieval.kag {
            Some(Ok(analysis)) => {
                merged.strategies_used.push(SourceKind::Kag.label().to_string());
                merged
                    .metadata
                    .result_counts
                    .insert(SourceKind::Kag, analysis.relationships.len());
                merged.metadata.insights = analysis.insights.clone();
                merged.graph = Some(analysis);
            }
            Some(Err(e)) => self.record_failure(&mut merged, SourceKind::Kag, &e),
            None => {}
        }

        match retrieval.temporal {
            Some(Ok(analysis)) => {
                merged
                    .strategies_used
                    .push(SourceKind::Temporal.label().to_string());
                merged
                    .metadata
                    .result_counts
                    .insert(SourceKind::Temporal, analysis.timeline.len());
                merged.metadata.trends = analysis.trends.clone();
                merged.temporal = Some(analysis);
            }
            Some(Err(e)) => self.record_failure(&mut merged, SourceKind::Temporal, &e),
            None => {}
        }

        if merged.strategies_used.is_empty() {
            warn!("No retrieval source succeeded; answering without context");
        }

        merged.metadata.strategy = Some(strategy);
        merged
    }

    async fn synthesize(&self, query: &str, context: &str, sources: &[Source]) -> String {
        let prompt = answer_prompt(query, context, sources);
        match self.completion.complete(&prompt).await {
            Ok(answer) if !answer.trim().is_empty() => answer.trim().to_string(),
            Ok(_) => {
                warn!("Completion returned an empty answer");
                FALLBACK_ANSWER.to_string()
            }
            Err(e) => {
                error!("Error generating answer: {}", e);
                FALLBACK_ANSWER.to_string()
            }
        }
    }

    async fn schedule_cache_write(
        &self,
        request: &QueryRequest,
        response: &QueryResponse,
        query_type: QueryType,
    ) {
        let cache = self.cache.clone();
        let text = request.text.clone();
        let context = request.cache_context();
        let answer = CachedAnswer::from(response);
        let confidence = response.confidence;

        let mut writes = self.pending_writes.lock().await;
        // Reap finished writes so the set stays small
        while let Some(result) = writes.try_join_next() {
            if let Err(e) = result {
                warn!("Cache write task failed: {}", e);
            }
        }

        writes.spawn(async move {
            if let Err(e) = cache
                .store(&text, &context, &answer, query_type, confidence)
                .await
            {
                warn!("Failed to cache answer: {}", e);
            }
        });
    }
}
