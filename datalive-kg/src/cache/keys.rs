//! Cache key derivation
//!
//! A query maps to up to five keys, always produced in the same probing order:
//!
//! 1. `exact:{hash(query)}`
//! 2. `normalized:{hash(lowercase(trim(query)))}`
//! 3. `user:{user_id}:{hash(query)}` when a user id is known
//! 4. `session:{session_id}:{hash(query)}` when a session id is known
//! 5. `semantic:{semantic_hash(query)}` when the query has significant keywords
//!
//! Embeddings are indexed separately under `semantic_embeddings:{hash}`.
//!
//! User and session ids are escaped with [`scope_segment`], so an id can never
//! reach into another scope's keys or act as a glob wildcard.

use crate::cache::types::{CacheContext, CacheKey};
use sha2::{Digest, Sha256};

/// Words ignored when building the semantic hash
pub const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it",
    "its", "of", "on", "that", "the", "to", "was", "will", "with", "what", "how", "when", "where",
    "who",
];

/// Keywords kept for the semantic hash, after sorting
pub const MAX_SEMANTIC_KEYWORDS: usize = 10;

/// Keywords must be longer than this (in characters)
pub const MIN_KEYWORD_CHARS: usize = 3;

/// Key namespaces, in probing order, plus the embedding index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyNamespace {
    Exact,
    Normalized,
    User,
    Session,
    Semantic,
    SemanticEmbeddings,
}

impl KeyNamespace {
    pub const ALL: [KeyNamespace; 6] = [
        KeyNamespace::Exact,
        KeyNamespace::Normalized,
        KeyNamespace::User,
        KeyNamespace::Session,
        KeyNamespace::Semantic,
        KeyNamespace::SemanticEmbeddings,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            KeyNamespace::Exact => "exact",
            KeyNamespace::Normalized => "normalized",
            KeyNamespace::User => "user",
            KeyNamespace::Session => "session",
            KeyNamespace::Semantic => "semantic",
            KeyNamespace::SemanticEmbeddings => "semantic_embeddings",
        }
    }

    /// Glob pattern matching every key in the namespace
    pub fn pattern(&self) -> String {
        format!("{}:*", self.prefix())
    }

    /// Glob pattern matching every key of one user or session
    pub fn scope_pattern(&self, id: &str) -> String {
        format!("{}:{}:*", self.prefix(), scope_segment(id))
    }
}

/// Percent-escape the key separator, glob metacharacters and `%` itself
pub fn scope_segment(id: &str) -> String {
    let mut escaped = String::with_capacity(id.len());
    for c in id.chars() {
        match c {
            '%' | ':' | '*' | '?' | '[' | ']' | '\\' => {
                escaped.push_str(&format!("%{:02X}", c as u32));
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Hex-encoded SHA-256 of the text
pub fn hash_text(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Lowercased word tokens longer than three characters that are not stop
/// words, sorted, truncated to [`MAX_SEMANTIC_KEYWORDS`].
pub fn significant_keywords(query: &str) -> Vec<String> {
    let lowered = query.to_lowercase();
    let mut words: Vec<String> = lowered
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| w.chars().count() > MIN_KEYWORD_CHARS)
        .filter(|w| !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect();

    words.sort();
    words.truncate(MAX_SEMANTIC_KEYWORDS);
    words
}

/// Hash of the sorted significant keywords, `None` when there are none
pub fn semantic_hash(query: &str) -> Option<String> {
    let keywords = significant_keywords(query);
    if keywords.is_empty() {
        None
    } else {
        Some(hash_text(&keywords.join(" ")))
    }
}

/// Key of the embedding index entry for a query
///
/// Queries without keywords fall back to the raw query hash.
pub fn embedding_index_key(query: &str) -> CacheKey {
    let hash = semantic_hash(query).unwrap_or_else(|| hash_text(query));
    format!("{}:{}", KeyNamespace::SemanticEmbeddings.prefix(), hash)
}

/// Ordered candidate keys for a query
pub fn candidate_keys(query: &str, context: &CacheContext) -> Vec<CacheKey> {
    let query_hash = hash_text(query);
    let mut keys = Vec::with_capacity(5);

    keys.push(format!("{}:{}", KeyNamespace::Exact.prefix(), query_hash));
    keys.push(format!(
        "{}:{}",
        KeyNamespace::Normalized.prefix(),
        hash_text(&normalize_query(query))
    ));

    if let Some(user_id) = context.user_id.as_deref().filter(|u| !u.is_empty()) {
        keys.push(format!(
            "{}:{}:{}",
            KeyNamespace::User.prefix(),
            scope_segment(user_id),
            query_hash
        ));
    }

    if let Some(session_id) = context.session_id.as_deref().filter(|s| !s.is_empty()) {
        keys.push(format!(
            "{}:{}:{}",
            KeyNamespace::Session.prefix(),
            scope_segment(session_id),
            query_hash
        ));
    }

    if let Some(hash) = semantic_hash(query) {
        keys.push(format!("{}:{}", KeyNamespace::Semantic.prefix(), hash));
    }

    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_order_and_scoping() {
        let ctx = CacheContext::new().with_user("42").with_session("s-1");
        let keys = candidate_keys("What is DataLive?", &ctx);

        assert_eq!(keys.len(), 5);
        assert!(keys[0].starts_with("exact:"));
        assert!(keys[1].starts_with("normalized:"));
        assert!(keys[2].starts_with("user:42:"));
        assert!(keys[3].starts_with("session:s-1:"));
        assert!(keys[4].starts_with("semantic:"));
    }

    #[test]
    fn test_scope_ids_cannot_reach_other_scopes() {
        assert_eq!(scope_segment("42"), "42");
        assert_eq!(scope_segment("42:evil"), "42%3Aevil");
        assert_eq!(scope_segment("*"), "%2A");
        assert_eq!(scope_segment("a?[b]%"), "a%3F%5Bb%5D%25");

        let ctx = CacheContext::new().with_user("42:evil").with_session("s*");
        let keys = candidate_keys("What is DataLive?", &ctx);
        assert!(keys[2].starts_with("user:42%3Aevil:"));
        assert!(keys[3].starts_with("session:s%2A:"));

        let own_scope = glob::Pattern::new("user:42:*").unwrap();
        assert!(!own_scope.matches(&keys[2]));
        assert_eq!(KeyNamespace::User.scope_pattern("42:evil"), "user:42%3Aevil:*");
    }

    #[test]
    fn test_anonymous_query_skips_scoped_keys() {
        let keys = candidate_keys("What is DataLive?", &CacheContext::default());
        assert_eq!(keys.len(), 3);
        assert!(!keys.iter().any(|k| k.starts_with("user:")));
    }

    #[test]
    fn test_normalized_key_ignores_case_and_padding() {
        let a = candidate_keys("  What is DataLive?  ", &CacheContext::default());
        let b = candidate_keys("what is datalive?", &CacheContext::default());
        assert_ne!(a[0], b[0]);
        assert_eq!(a[1], b[1]);
    }

    #[test]
    fn test_significant_keywords() {
        let words = significant_keywords("What is the status of the DataLive ingestion pipeline?");
        assert_eq!(words, vec!["datalive", "ingestion", "pipeline", "status"]);

        // stop words longer than three chars are removed as well
        assert!(significant_keywords("where when what with from will").is_empty());
    }

    #[test]
    fn test_keywords_sorted_and_truncated() {
        let words = significant_keywords(
            "zeta yotta xenon whisky victor uniform tango sierra romeo quebec papa oscar",
        );
        assert_eq!(words.len(), MAX_SEMANTIC_KEYWORDS);
        assert_eq!(words.first().map(String::as_str), Some("oscar"));
        assert!(words.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_semantic_hash_is_order_independent() {
        assert_eq!(
            semantic_hash("pipeline ingestion status"),
            semantic_hash("Status of ingestion pipeline")
        );
        assert_eq!(semantic_hash("who is he?"), None);
    }

    #[test]
    fn test_keyword_free_query_has_no_semantic_key() {
        let keys = candidate_keys("who is he?", &CacheContext::default());
        assert_eq!(keys.len(), 2);
        assert!(embedding_index_key("who is he?").starts_with("semantic_embeddings:"));
    }

    #[test]
    fn test_hash_text_is_hex_sha256() {
        let h = hash_text("abc");
        assert_eq!(h.len(), 64);
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
