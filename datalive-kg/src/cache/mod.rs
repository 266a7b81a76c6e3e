//! # Adaptive Answer Cache
//!
//! Reuses previous answers through several cache keys per query plus an
//! embedding similarity fallback.
//!
//! ## Features
//!
//! - **Multi-key probing**: exact, normalized, user-scoped, session-scoped and
//!   keyword-derived semantic keys, always probed in that order
//! - **Per-type TTL**: the TTL is chosen from the query type when the answer is
//!   written and recorded alongside it
//! - **Similarity fallback**: cosine similarity against the most recently
//!   indexed query embeddings
//! - **Pattern invalidation**: glob patterns such as `user:42:*`
//! - **Pluggable store**: any [`KeyValueStore`]; [`MemoryStore`] keeps keys in
//!   process, [`SqliteStore`] keeps them in a file shared across processes.
//!   Both evict LRU keys and are swept by [`start_auto_cleanup`]
//!
//! ## Example
//!
//! ```rust
//! use datalive_kg::cache::{
//!     AdaptiveCache, CacheConfig, CacheContext, EmbeddingService, MemoryStore, QueryType,
//! };
//! use std::sync::Arc;
//!
//! struct Bag;
//!
//! #[async_trait::async_trait]
//! impl EmbeddingService for Bag {
//!     async fn embed(&self, text: &str) -> datalive_kg::Result<Vec<f32>> {
//!         Ok(vec![text.len() as f32, 1.0])
//!     }
//! }
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = CacheConfig::default();
//! let store = Arc::new(MemoryStore::new(config.clone()));
//! let cache = AdaptiveCache::new(config, store, Arc::new(Bag));
//!
//! let ctx = CacheContext::new().with_user("42");
//! cache
//!     .store("What is DataLive?", &ctx, &"A data platform".to_string(), QueryType::Factual, 0.95)
//!     .await?;
//!
//! if let Some(hit) = cache.lookup::<String>("what is datalive?", &ctx).await {
//!     println!("Cache hit: {} ({:?})", hit.result, hit.matched);
//! }
//! # Ok(())
//! # }
//! ```

pub mod adaptive;
pub mod clock;
pub mod config;
pub mod entry;
pub mod invalidation;
pub mod keys;
pub mod similarity;
pub mod sqlite;
pub mod store;
pub mod types;

pub use adaptive::AdaptiveCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, CacheConfigBuilder, TtlTable};
pub use invalidation::{InvalidationEvent, InvalidationReason, KeyPattern};
pub use keys::{candidate_keys, hash_text, scope_segment, semantic_hash, KeyNamespace};
pub use similarity::{cosine_similarity, EmbeddingService};
pub use sqlite::SqliteStore;
pub use store::{start_auto_cleanup, KeyValueStore, MemoryStore, StoreStats};
pub use types::{
    CacheContext, CacheKey, CacheMatch, CacheRecord, CacheStats, MemoryUsage, QueryType,
};
