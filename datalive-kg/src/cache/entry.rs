//! Stored value with expiry and access metadata

use chrono::{DateTime, Utc};
use std::time::Duration;

/// A value held by [`MemoryStore`](crate::cache::store::MemoryStore)
#[derive(Debug, Clone)]
pub struct StoreEntry {
    pub value: String,
    pub metadata: EntryMetadata,
}

/// Metadata associated with a stored value
#[derive(Debug, Clone)]
pub struct EntryMetadata {
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_count: u64,
    pub size_bytes: usize,
}

impl StoreEntry {
    pub fn new(key: &str, value: String, ttl: Duration, now: DateTime<Utc>) -> Self {
        let expires_at =
            now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(3600));
        let size_bytes = key.len() + value.len() + std::mem::size_of::<EntryMetadata>();

        Self {
            value,
            metadata: EntryMetadata {
                created_at: now,
                accessed_at: now,
                expires_at,
                access_count: 0,
                size_bytes,
            },
        }
    }

    /// Expired once `now` reaches `expires_at`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.metadata.expires_at
    }

    /// Remaining lifetime, `None` once expired
    pub fn time_until_expiration(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.is_expired(now) {
            None
        } else {
            (self.metadata.expires_at - now).to_std().ok()
        }
    }

    pub fn mark_accessed(&mut self, now: DateTime<Utc>) {
        self.metadata.accessed_at = now;
        self.metadata.access_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_expiration() {
        let now = Utc::now();
        let entry = StoreEntry::new("k", "v".to_string(), Duration::from_secs(1), now);

        assert!(!entry.is_expired(now));
        assert!(entry.time_until_expiration(now).is_some());
        assert!(entry.is_expired(now + chrono::Duration::seconds(1)));
        assert!(entry
            .time_until_expiration(now + chrono::Duration::seconds(2))
            .is_none());
    }

    #[test]
    fn test_size_accounts_for_key_and_value() {
        let now = Utc::now();
        let small = StoreEntry::new("k", "v".to_string(), Duration::from_secs(1), now);
        let large = StoreEntry::new("k", "v".repeat(100), Duration::from_secs(1), now);
        assert_eq!(large.metadata.size_bytes - small.metadata.size_bytes, 99);
    }

    #[test]
    fn test_mark_accessed() {
        let now = Utc::now();
        let mut entry = StoreEntry::new("k", "v".to_string(), Duration::from_secs(60), now);
        let later = now + chrono::Duration::seconds(5);
        entry.mark_accessed(later);
        assert_eq!(entry.metadata.access_count, 1);
        assert_eq!(entry.metadata.accessed_at, later);
    }
}
