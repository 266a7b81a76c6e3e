//! Key-value store abstraction and the in-memory implementation
//!
//! [`KeyValueStore`] is the only persistent, shared state of the cache. Any
//! backend with per-key TTL and glob key scans can implement it.

use crate::cache::{
    clock::{Clock, SystemClock},
    config::CacheConfig,
    entry::StoreEntry,
    invalidation::{InvalidationEvent, InvalidationReason, KeyPattern},
    types::{CacheKey, MemoryUsage},
};
use crate::error::{KgError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// String key-value store with per-key TTL
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Value of a live key
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one, expiring after `ttl`
    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Delete keys, returning how many existed
    async fn delete(&self, keys: &[CacheKey]) -> Result<usize>;

    /// Live keys matching a glob pattern
    async fn keys_matching(&self, pattern: &str) -> Result<Vec<CacheKey>>;

    async fn memory_usage(&self) -> Result<MemoryUsage>;

    /// Drop every expired key, returning how many were removed
    async fn purge_expired(&self) -> Result<usize>;
}

/// Counters kept by [`MemoryStore`]
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions_size: u64,
    pub evictions_ttl: u64,
    pub deletions: u64,
}

/// In-process store with TTL expiry and LRU eviction
///
/// - Thread-safe async access via RwLock
/// - Expiry read from an injectable [`Clock`]
/// - LRU eviction when entry or byte limits are reached
pub struct MemoryStore {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    inner: Arc<RwLock<StoreInner>>,
}

struct StoreInner {
    entries: HashMap<CacheKey, StoreEntry>,

    /// Access order, least recent first
    lru_queue: VecDeque<CacheKey>,

    stats: StoreStats,
    current_size_bytes: usize,
    peak_size_bytes: usize,
}

impl StoreInner {
    fn remove_entry(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.lru_queue.retain(|k| k != key);
                self.current_size_bytes = self
                    .current_size_bytes
                    .saturating_sub(entry.metadata.size_bytes);
                true
            }
            None => false,
        }
    }

    fn touch(&mut self, key: &str) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.to_string());
    }
}

impl MemoryStore {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        info!(
            "Initializing in-memory cache store (max_entries: {}, max_size_bytes: {})",
            config.max_entries, config.max_size_bytes
        );

        Self {
            config,
            clock,
            inner: Arc::new(RwLock::new(StoreInner {
                entries: HashMap::new(),
                lru_queue: VecDeque::new(),
                stats: StoreStats::default(),
                current_size_bytes: 0,
                peak_size_bytes: 0,
            })),
        }
    }

    pub async fn stats(&self) -> StoreStats {
        self.inner.read().await.stats.clone()
    }

    /// Number of stored keys, including expired ones not yet swept
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    /// Remaining lifetime of a key
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        let inner = self.inner.read().await;
        inner
            .entries
            .get(key)
            .and_then(|e| e.time_until_expiration(now))
    }

    /// Remove all expired entries
    pub async fn cleanup_expired(&self) -> Option<InvalidationEvent> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;

        let expired: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        if expired.is_empty() {
            return None;
        }

        for key in &expired {
            inner.remove_entry(key);
        }
        inner.stats.evictions_ttl += expired.len() as u64;

        debug!("Cleaned up {} expired entries", expired.len());
        Some(InvalidationEvent::new(
            InvalidationReason::Expired,
            expired,
            now,
        ))
    }

    /// Make room for `needed_size` more bytes and one more key
    fn evict_if_needed(&self, inner: &mut StoreInner, needed_size: usize) -> Result<()> {
        while inner.entries.len() >= self.config.max_entries {
            match inner.lru_queue.pop_front() {
                Some(key) => {
                    debug!("Evicting entry due to max_entries limit: {}", key);
                    inner.remove_entry(&key);
                    inner.stats.evictions_size += 1;
                }
                None => break,
            }
        }

        while inner.current_size_bytes + needed_size > self.config.max_size_bytes {
            match inner.lru_queue.pop_front() {
                Some(key) => {
                    debug!("Evicting entry due to size limit: {}", key);
                    inner.remove_entry(&key);
                    inner.stats.evictions_size += 1;
                }
                None => {
                    warn!("Cannot evict more entries, store size limit exceeded");
                    return Err(KgError::StoreError(format!(
                        "value of {} bytes exceeds store size limit",
                        needed_size
                    )));
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;

        let expired = match inner.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.mark_accessed(now);
                let value = entry.value.clone();
                inner.stats.hits += 1;
                inner.touch(key);
                return Ok(Some(value));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            debug!("Store entry expired: {}", key);
            inner.remove_entry(key);
            inner.stats.evictions_ttl += 1;
        }
        inner.stats.misses += 1;
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let entry = StoreEntry::new(key, value, ttl, self.clock.now());
        let size = entry.metadata.size_bytes;

        let mut inner = self.inner.write().await;

        // Replacing a key frees its old size first
        inner.remove_entry(key);
        self.evict_if_needed(&mut inner, size)?;

        inner.entries.insert(key.to_string(), entry);
        inner.lru_queue.push_back(key.to_string());
        inner.current_size_bytes += size;
        inner.peak_size_bytes = inner.peak_size_bytes.max(inner.current_size_bytes);

        debug!("Stored key {} (ttl: {:?})", key, ttl);
        Ok(())
    }

    async fn delete(&self, keys: &[CacheKey]) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let removed = keys.iter().filter(|k| inner.remove_entry(k)).count();
        inner.stats.deletions += removed as u64;
        Ok(removed)
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<CacheKey>> {
        let pattern = KeyPattern::parse(pattern)?;
        let now = self.clock.now();
        let inner = self.inner.read().await;

        let mut keys: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && pattern.matches(key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn memory_usage(&self) -> Result<MemoryUsage> {
        let inner = self.inner.read().await;
        Ok(MemoryUsage {
            used_bytes: inner.current_size_bytes,
            peak_bytes: inner.peak_size_bytes,
            entries: inner.entries.len(),
        })
    }

    async fn purge_expired(&self) -> Result<usize> {
        Ok(self.cleanup_expired().await.map_or(0, |event| event.len()))
    }
}

/// Background task sweeping expired keys every `interval`
pub async fn start_auto_cleanup<S>(store: Arc<S>, interval: Duration)
where
    S: KeyValueStore + ?Sized,
{
    info!("Starting cache store cleanup task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;

        match store.purge_expired().await {
            Ok(0) => {}
            Ok(removed) => debug!("Auto cleanup removed {} expired keys", removed),
            Err(e) => warn!("Auto cleanup failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;

    fn store_with_clock() -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = MemoryStore::with_clock(CacheConfig::default(), clock.clone());
        (store, clock)
    }

    #[tokio::test]
    async fn test_basic_set_and_get() {
        let (store, _) = store_with_clock();

        store
            .set_with_ttl("key1", "value1".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(store.get("key1").await.unwrap(), Some("value1".to_string()));
        assert_eq!(store.get("missing").await.unwrap(), None);

        let stats = store.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_ttl_expiration_removes_key() {
        let (store, clock) = store_with_clock();

        store
            .set_with_ttl("key1", "value1".to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(store.get("key1").await.unwrap().is_some());

        clock.advance(Duration::from_secs(2));

        assert_eq!(store.get("key1").await.unwrap(), None);
        assert_eq!(store.len().await, 0);
        assert_eq!(store.stats().await.evictions_ttl, 1);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value_and_size() {
        let (store, _) = store_with_clock();

        store
            .set_with_ttl("k", "a".repeat(100), Duration::from_secs(60))
            .await
            .unwrap();
        let before = store.memory_usage().await.unwrap();

        store
            .set_with_ttl("k", "b".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        let after = store.memory_usage().await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(before.used_bytes - after.used_bytes, 99);
        assert_eq!(after.peak_bytes, before.used_bytes);
        assert_eq!(store.get("k").await.unwrap(), Some("b".to_string()));
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let config = CacheConfig::builder().max_entries(3).build();
        let store = MemoryStore::new(config);
        let ttl = Duration::from_secs(60);

        for key in ["a", "b", "c"] {
            store.set_with_ttl(key, key.to_string(), ttl).await.unwrap();
        }

        // Touch "a" so "b" becomes least recently used
        store.get("a").await.unwrap();
        store.set_with_ttl("d", "d".to_string(), ttl).await.unwrap();

        assert!(store.get("a").await.unwrap().is_some());
        assert!(store.get("b").await.unwrap().is_none());
        assert_eq!(store.stats().await.evictions_size, 1);
    }

    #[tokio::test]
    async fn test_value_larger_than_store_is_rejected() {
        let config = CacheConfig::builder().max_size_bytes(64).build();
        let store = MemoryStore::new(config);

        let result = store
            .set_with_ttl("big", "x".repeat(1024), Duration::from_secs(60))
            .await;
        assert!(matches!(result, Err(KgError::StoreError(_))));
    }

    #[tokio::test]
    async fn test_keys_matching_and_delete() {
        let (store, _) = store_with_clock();
        let ttl = Duration::from_secs(60);

        for key in ["user:42:a", "user:42:b", "user:7:a", "exact:a"] {
            store.set_with_ttl(key, "v".to_string(), ttl).await.unwrap();
        }

        let keys = store.keys_matching("user:42:*").await.unwrap();
        assert_eq!(keys, vec!["user:42:a".to_string(), "user:42:b".to_string()]);

        let removed = store.delete(&keys).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.delete(&keys).await.unwrap(), 0);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_keys_matching_skips_expired() {
        let (store, clock) = store_with_clock();

        store
            .set_with_ttl("exact:short", "v".to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        store
            .set_with_ttl("exact:long", "v".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(5));
        let keys = store.keys_matching("exact:*").await.unwrap();
        assert_eq!(keys, vec!["exact:long".to_string()]);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let (store, clock) = store_with_clock();

        store
            .set_with_ttl("a", "v".to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        store
            .set_with_ttl("b", "v".to_string(), Duration::from_secs(100))
            .await
            .unwrap();

        assert!(store.cleanup_expired().await.is_none());

        clock.advance(Duration::from_secs(10));
        let event = store.cleanup_expired().await.unwrap();
        assert_eq!(event.keys, vec!["a".to_string()]);
        assert_eq!(event.reason, InvalidationReason::Expired);
        assert_eq!(store.len().await, 1);
    }
}
