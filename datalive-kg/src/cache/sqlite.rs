//! SQLite-backed store
//!
//! Keys live in a single file, so they survive restarts and every process
//! opening the same file (the HTTP server, `datalive ask`, `datalive cache`)
//! sees the same cache. WAL mode and a busy timeout let those processes
//! read and write side by side.
//!
//! Expiry and LRU order follow [`MemoryStore`](crate::cache::store::MemoryStore):
//! a key is gone once the clock reaches `expires_at`, and writes evict the
//! least recently read keys when `max_entries` or `max_size_bytes` is reached.

use crate::cache::{
    clock::{Clock, SystemClock},
    config::CacheConfig,
    invalidation::KeyPattern,
    store::KeyValueStore,
    types::{CacheKey, MemoryUsage},
};
use crate::error::{KgError, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cache_entries (
        key         TEXT PRIMARY KEY,
        value       TEXT NOT NULL,
        expires_at  INTEGER NOT NULL,
        accessed_at INTEGER NOT NULL,
        size_bytes  INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries (expires_at);
    CREATE INDEX IF NOT EXISTS idx_cache_entries_accessed ON cache_entries (accessed_at);
    CREATE TABLE IF NOT EXISTS cache_meta (
        name  TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    );
";

fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        ",
    )
}

/// Persistent store over one SQLite connection
pub struct SqliteStore {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the cache database at `path`
    pub fn open(path: impl AsRef<Path>, config: CacheConfig) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                KgError::StoreError(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        conn.execute_batch(SCHEMA)?;

        info!(
            "Opened SQLite cache store at {} (max_entries: {}, max_size_bytes: {})",
            path.display(),
            config.max_entries,
            config.max_size_bytes
        );
        Ok(Self::from_connection(conn, config, Some(path.to_path_buf())))
    }

    /// Private in-memory database, gone when the store is dropped
    pub fn open_in_memory(config: CacheConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::from_connection(conn, config, None))
    }

    fn from_connection(conn: Connection, config: CacheConfig, path: Option<PathBuf>) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            conn: Arc::new(Mutex::new(conn)),
            path,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn now_millis(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    /// Run `op` on the blocking pool with the connection locked
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| KgError::StoreError("sqlite connection lock poisoned".to_string()))?;
            op(&mut conn)
        })
        .await
        .map_err(|e| KgError::StoreError(format!("sqlite task failed: {}", e)))?
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.now_millis();
        let key = key.to_string();

        self.run(move |conn| {
            let row: Option<(String, i64)> = conn
                .query_row(
                    "SELECT value, expires_at FROM cache_entries WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match row {
                Some((value, expires_at)) if expires_at > now => {
                    conn.execute(
                        "UPDATE cache_entries SET accessed_at = ?2 WHERE key = ?1",
                        params![key, now],
                    )?;
                    Ok(Some(value))
                }
                Some(_) => {
                    debug!("Store entry expired: {}", key);
                    conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                    Ok(None)
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let size = (key.len() + value.len()) as i64;
        let max_entries = self.config.max_entries as i64;
        let max_bytes = self.config.max_size_bytes as i64;
        if size > max_bytes {
            return Err(KgError::StoreError(format!(
                "value of {} bytes exceeds store size limit",
                size
            )));
        }

        let now = self.now_millis();
        let expires_at = now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));
        let key = key.to_string();

        let evicted = self
            .run(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM cache_entries WHERE key = ?1 OR expires_at <= ?2",
                    params![key, now],
                )?;

                let (mut count, mut used): (i64, i64) = tx.query_row(
                    "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM cache_entries",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;

                let mut evicted = 0usize;
                while count >= max_entries || used + size > max_bytes {
                    let victim: Option<(String, i64)> = tx
                        .query_row(
                            "SELECT key, size_bytes FROM cache_entries
                             ORDER BY accessed_at ASC, rowid ASC LIMIT 1",
                            [],
                            |row| Ok((row.get(0)?, row.get(1)?)),
                        )
                        .optional()?;
                    let Some((victim, victim_size)) = victim else {
                        break;
                    };
                    tx.execute("DELETE FROM cache_entries WHERE key = ?1", params![victim])?;
                    count -= 1;
                    used -= victim_size;
                    evicted += 1;
                }

                tx.execute(
                    "INSERT INTO cache_entries (key, value, expires_at, accessed_at, size_bytes)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![key, value, expires_at, now, size],
                )?;
                tx.execute(
                    "INSERT INTO cache_meta (name, value) VALUES ('peak_bytes', ?1)
                     ON CONFLICT(name) DO UPDATE SET value = MAX(value, excluded.value)",
                    params![used + size],
                )?;
                tx.commit()?;
                Ok(evicted)
            })
            .await?;

        if evicted > 0 {
            debug!("Evicted {} least recently used keys", evicted);
        }
        Ok(())
    }

    async fn delete(&self, keys: &[CacheKey]) -> Result<usize> {
        let keys = keys.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            {
                let mut stmt = tx.prepare("DELETE FROM cache_entries WHERE key = ?1")?;
                for key in &keys {
                    removed += stmt.execute(params![key])?;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<CacheKey>> {
        let pattern = KeyPattern::parse(pattern)?;
        let now = self.now_millis();

        let live: Vec<CacheKey> = self
            .run(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT key FROM cache_entries WHERE expires_at > ?1 ORDER BY key")?;
                let keys = stmt
                    .query_map(params![now], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                Ok(keys)
            })
            .await?;

        Ok(live.into_iter().filter(|key| pattern.matches(key)).collect())
    }

    async fn memory_usage(&self) -> Result<MemoryUsage> {
        self.run(|conn| {
            let (entries, used): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM cache_entries",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let peak: Option<i64> = conn
                .query_row(
                    "SELECT value FROM cache_meta WHERE name = 'peak_bytes'",
                    [],
                    |row| row.get(0),
                )
                .optional()?;

            Ok(MemoryUsage {
                used_bytes: used as usize,
                peak_bytes: peak.unwrap_or(0).max(used) as usize,
                entries: entries as usize,
            })
        })
        .await
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = self.now_millis();
        self.run(move |conn| {
            Ok(conn.execute(
                "DELETE FROM cache_entries WHERE expires_at <= ?1",
                params![now],
            )?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;

    fn store_with_clock() -> (SqliteStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = SqliteStore::open_in_memory(CacheConfig::default())
            .unwrap()
            .with_clock(clock.clone());
        (store, clock)
    }

    #[tokio::test]
    async fn test_set_get_and_expiry() {
        let (store, clock) = store_with_clock();

        store
            .set_with_ttl("exact:a", "value".to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(store.get("exact:a").await.unwrap(), Some("value".to_string()));
        assert_eq!(store.get("exact:missing").await.unwrap(), None);

        clock.advance(Duration::from_secs(1));
        assert_eq!(store.get("exact:a").await.unwrap(), None);
        assert_eq!(store.memory_usage().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_one_row() {
        let (store, _) = store_with_clock();
        let ttl = Duration::from_secs(60);

        store.set_with_ttl("k", "a".repeat(100), ttl).await.unwrap();
        let before = store.memory_usage().await.unwrap();
        store.set_with_ttl("k", "b".to_string(), ttl).await.unwrap();
        let after = store.memory_usage().await.unwrap();

        assert_eq!(after.entries, 1);
        assert_eq!(before.used_bytes - after.used_bytes, 99);
        assert_eq!(after.peak_bytes, before.used_bytes);
        assert_eq!(store.get("k").await.unwrap(), Some("b".to_string()));
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let clock = Arc::new(ManualClock::starting_now());
        let config = CacheConfig::builder().max_entries(3).build();
        let store = SqliteStore::open_in_memory(config)
            .unwrap()
            .with_clock(clock.clone());
        let ttl = Duration::from_secs(60);

        for key in ["a", "b", "c"] {
            store.set_with_ttl(key, key.to_string(), ttl).await.unwrap();
            clock.advance(Duration::from_millis(10));
        }

        // Reading "a" leaves "b" as the least recently used key
        store.get("a").await.unwrap();
        clock.advance(Duration::from_millis(10));
        store.set_with_ttl("d", "d".to_string(), ttl).await.unwrap();

        assert!(store.get("a").await.unwrap().is_some());
        assert!(store.get("b").await.unwrap().is_none());
        assert_eq!(store.memory_usage().await.unwrap().entries, 3);
    }

    #[tokio::test]
    async fn test_value_larger_than_store_is_rejected() {
        let config = CacheConfig::builder().max_size_bytes(64).build();
        let store = SqliteStore::open_in_memory(config).unwrap();

        let result = store
            .set_with_ttl("big", "x".repeat(1024), Duration::from_secs(60))
            .await;
        assert!(matches!(result, Err(KgError::StoreError(_))));
    }

    #[tokio::test]
    async fn test_keys_matching_delete_and_purge() {
        let (store, clock) = store_with_clock();
        let ttl = Duration::from_secs(60);

        for key in ["user:42:a", "user:42:b", "user:7:a"] {
            store.set_with_ttl(key, "v".to_string(), ttl).await.unwrap();
        }
        store
            .set_with_ttl("exact:short", "v".to_string(), Duration::from_secs(1))
            .await
            .unwrap();

        let keys = store.keys_matching("user:42:*").await.unwrap();
        assert_eq!(keys, vec!["user:42:a".to_string(), "user:42:b".to_string()]);
        assert_eq!(store.delete(&keys).await.unwrap(), 2);
        assert_eq!(store.delete(&keys).await.unwrap(), 0);

        clock.advance(Duration::from_secs(5));
        assert!(store.keys_matching("exact:*").await.unwrap().is_empty());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.memory_usage().await.unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_invalid_pattern_is_store_error() {
        let (store, _) = store_with_clock();
        let result = store.keys_matching("user:[").await;
        assert!(matches!(result, Err(KgError::StoreError(_))));
    }

    #[tokio::test]
    async fn test_keys_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");

        {
            let store = SqliteStore::open(&path, CacheConfig::default()).unwrap();
            store
                .set_with_ttl("exact:a", "kept".to_string(), Duration::from_secs(60))
                .await
                .unwrap();
        }

        let reopened = SqliteStore::open(&path, CacheConfig::default()).unwrap();
        assert_eq!(reopened.path(), Some(path.as_path()));
        assert_eq!(reopened.get("exact:a").await.unwrap(), Some("kept".to_string()));
    }
}
