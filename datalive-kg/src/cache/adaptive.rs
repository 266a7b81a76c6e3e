//! Multi-key, similarity-aware answer cache
//!
//! A lookup probes the candidate keys of a query in a fixed order (see
//! [`keys`](crate::cache::keys)). Stale records found on the way are deleted.
//! When no key resolves, the query embedding is compared against the most
//! recently indexed embeddings and the best match at or above the similarity
//! threshold is returned.
//!
//! Store and embedding failures never surface from [`AdaptiveCache::lookup`];
//! they are logged and the lookup is a miss.

use crate::cache::{
    clock::{Clock, SystemClock},
    config::CacheConfig,
    invalidation::{InvalidationReason, KeyPattern},
    keys::{candidate_keys, embedding_index_key, KeyNamespace},
    similarity::{cosine_similarity, EmbeddingService},
    store::KeyValueStore,
    types::{CacheContext, CacheKey, CacheMatch, CacheRecord, CacheStats, QueryType},
};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct AdaptiveCache {
    config: CacheConfig,
    store: Arc<dyn KeyValueStore>,
    embedder: Arc<dyn EmbeddingService>,
    clock: Arc<dyn Clock>,

    /// Embedding index keys, most recently written last
    recent_embeddings: RwLock<VecDeque<CacheKey>>,

    counters: LookupCounters,
}

#[derive(Default)]
struct LookupCounters {
    hits: AtomicU64,
    similarity_hits: AtomicU64,
    misses: AtomicU64,
}

/// Only the timestamp of an index entry, for ordering on warm-up
#[derive(Deserialize)]
struct IndexStamp {
    cached_at: DateTime<Utc>,
}

impl AdaptiveCache {
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn KeyValueStore>,
        embedder: Arc<dyn EmbeddingService>,
    ) -> Self {
        Self {
            config,
            store,
            embedder,
            clock: Arc::new(SystemClock),
            recent_embeddings: RwLock::new(VecDeque::new()),
            counters: LookupCounters::default(),
        }
    }

    /// Use another time source for freshness checks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Find a fresh cached record for the query
    pub async fn lookup<T: DeserializeOwned>(
        &self,
        query: &str,
        context: &CacheContext,
    ) -> Option<CacheRecord<T>> {
        match self.probe_keys(query, context).await {
            Ok(Some(record)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Some(record);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Cache probe failed, treating as miss: {}", e);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        match self.find_similar(query).await {
            Ok(Some(record)) => {
                self.counters.similarity_hits.fetch_add(1, Ordering::Relaxed);
                Some(record)
            }
            Ok(None) => {
                debug!("Cache miss for query ({} chars)", query.len());
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                warn!("Similarity lookup failed, treating as miss: {}", e);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Write a result under every candidate key of the query
    ///
    /// The TTL comes from the query type and is recorded in the record. The
    /// query embedding is indexed for similarity lookups; an embedding failure
    /// only skips the index entry. Returns the keys written.
    pub async fn store<T: Serialize>(
        &self,
        query: &str,
        context: &CacheContext,
        result: &T,
        query_type: QueryType,
        confidence: f64,
    ) -> Result<Vec<CacheKey>> {
        let keys = candidate_keys(query, context);
        let ttl = self.config.ttl_with_jitter(query_type);

        let embedding = match self.embedder.embed(query).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!("Could not embed query for similarity index: {}", e);
                None
            }
        };

        let record = CacheRecord {
            keys: keys.clone(),
            query: query.to_string(),
            result,
            query_type,
            cached_at: self.clock.now(),
            ttl_seconds: ttl.as_secs(),
            confidence,
            embedding: None,
            matched: None,
        };

        let payload = serde_json::to_string(&record)?;
        for key in &keys {
            self.store.set_with_ttl(key, payload.clone(), ttl).await?;
        }

        if let Some(embedding) = embedding {
            let index_key = embedding_index_key(query);
            let indexed = CacheRecord {
                embedding: Some(embedding),
                ..record
            };
            self.store
                .set_with_ttl(
                    &index_key,
                    serde_json::to_string(&indexed)?,
                    self.config.embedding_index_ttl,
                )
                .await?;
            self.remember(index_key).await;
        }

        info!(
            "Cached {} answer under {} keys (ttl: {}s, confidence: {:.3})",
            query_type,
            keys.len(),
            ttl.as_secs(),
            confidence
        );
        Ok(keys)
    }

    /// Delete every key matching a glob pattern, returning the count
    pub async fn invalidate(&self, pattern: &str) -> Result<usize> {
        let matcher = KeyPattern::parse(pattern)?;
        let keys = self.store.keys_matching(matcher.as_str()).await?;
        if keys.is_empty() {
            debug!("No cache entries match {}", pattern);
            return Ok(0);
        }

        let removed = self.store.delete(&keys).await?;
        self.recent_embeddings
            .write()
            .await
            .retain(|key| !matcher.matches(key));

        info!(
            "Invalidated {} cache entries ({})",
            removed,
            InvalidationReason::Pattern {
                pattern: pattern.to_string()
            }
        );
        Ok(removed)
    }

    /// Key counts per namespace, store memory and lookup counters
    pub async fn stats(&self) -> Result<CacheStats> {
        let mut namespaces = BTreeMap::new();
        for namespace in KeyNamespace::ALL {
            let count = self.store.keys_matching(&namespace.pattern()).await?.len();
            namespaces.insert(namespace.prefix().to_string(), count);
        }

        Ok(CacheStats {
            namespaces,
            memory: self.store.memory_usage().await?,
            hits: self.counters.hits.load(Ordering::Relaxed),
            similarity_hits: self.counters.similarity_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
        })
    }

    /// Rebuild the recency list from index entries already in the store
    ///
    /// Needed when the store outlives the process. Returns the number of
    /// embeddings now eligible for similarity scans.
    pub async fn warm_semantic_index(&self) -> Result<usize> {
        let keys = self
            .store
            .keys_matching(&KeyNamespace::SemanticEmbeddings.pattern())
            .await?;

        let mut stamped = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(raw) = self.store.get(&key).await? {
                match serde_json::from_str::<IndexStamp>(&raw) {
                    Ok(stamp) => stamped.push((stamp.cached_at, key)),
                    Err(e) => warn!("Skipping undecodable index entry {}: {}", key, e),
                }
            }
        }
        stamped.sort();

        let mut recent = self.recent_embeddings.write().await;
        recent.clear();
        recent.extend(stamped.into_iter().map(|(_, key)| key));
        while recent.len() > self.config.embedding_index_capacity {
            recent.pop_front();
        }

        info!("Warmed similarity index with {} embeddings", recent.len());
        Ok(recent.len())
    }

    /// Number of embeddings eligible for similarity scans
    pub async fn indexed_embeddings(&self) -> usize {
        self.recent_embeddings.read().await.len()
    }

    async fn probe_keys<T: DeserializeOwned>(
        &self,
        query: &str,
        context: &CacheContext,
    ) -> Result<Option<CacheRecord<T>>> {
        for key in candidate_keys(query, context) {
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };

            match serde_json::from_str::<CacheRecord<T>>(&raw) {
                Ok(mut record) if record.is_fresh(self.clock.now()) => {
                    debug!("Cache hit on {}", key);
                    record.matched = Some(CacheMatch::Key { key });
                    return Ok(Some(record));
                }
                Ok(_) => self.discard(&key, InvalidationReason::Stale).await,
                Err(e) => {
                    warn!("Undecodable cache record at {}: {}", key, e);
                    self.discard(&key, InvalidationReason::Corrupt).await;
                }
            }
        }

        Ok(None)
    }

    async fn find_similar<T: DeserializeOwned>(
        &self,
        query: &str,
    ) -> Result<Option<CacheRecord<T>>> {
        let candidates: Vec<CacheKey> = {
            let recent = self.recent_embeddings.read().await;
            recent
                .iter()
                .rev()
                .take(self.config.similarity_scan_limit)
                .cloned()
                .collect()
        };
        if candidates.is_empty() {
            return Ok(None);
        }

        let query_embedding = self.embedder.embed(query).await?;
        let mut best: Option<(f32, CacheRecord<T>)> = None;
        let mut gone = Vec::new();

        for key in candidates {
            let Some(raw) = self.store.get(&key).await? else {
                gone.push(key);
                continue;
            };

            let record = match serde_json::from_str::<CacheRecord<T>>(&raw) {
                Ok(record) if record.is_fresh(self.clock.now()) => record,
                Ok(_) => {
                    self.discard(&key, InvalidationReason::Stale).await;
                    gone.push(key);
                    continue;
                }
                Err(e) => {
                    warn!("Undecodable index entry at {}: {}", key, e);
                    self.discard(&key, InvalidationReason::Corrupt).await;
                    gone.push(key);
                    continue;
                }
            };

            let Some(embedding) = record.embedding.as_deref() else {
                continue;
            };

            let similarity = cosine_similarity(&query_embedding, embedding);
            let better = best.as_ref().map_or(true, |(score, _)| similarity > *score);
            if similarity >= self.config.similarity_threshold && better {
                best = Some((similarity, record));
            }
        }

        if !gone.is_empty() {
            self.recent_embeddings
                .write()
                .await
                .retain(|key| !gone.contains(key));
        }

        Ok(best.map(|(similarity, mut record)| {
            info!("Found similar cached query (similarity: {:.3})", similarity);
            record.matched = Some(CacheMatch::Similar {
                similarity,
                original_query: record.query.clone(),
            });
            record
        }))
    }

    async fn remember(&self, index_key: CacheKey) {
        let mut recent = self.recent_embeddings.write().await;
        recent.retain(|key| key != &index_key);
        recent.push_back(index_key);
        while recent.len() > self.config.embedding_index_capacity {
            recent.pop_front();
        }
    }

    async fn discard(&self, key: &str, reason: InvalidationReason) {
        match self.store.delete(&[key.to_string()]).await {
            Ok(_) => debug!("Dropped cache key {} ({})", key, reason),
            Err(e) => warn!("Failed to drop cache key {} ({}): {}", key, reason, e),
        }
    }
}
