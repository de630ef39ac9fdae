//! Query normalization, cache keys and an in-process TTL cache

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::Result;

use super::backends::CacheStore;
use super::types::RetrievalResult;

/// Lowercase with runs of whitespace collapsed to one space
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// SHA-256 hex over the normalized query and the result count
pub fn cache_key(query: &str, k: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_query(query).as_bytes());
    hasher.update(b"\x1f");
    hasher.update(k.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

struct Entry {
    expires_at: Instant,
    value: Vec<RetrievalResult>,
}

/// Process-local cache with per-entry expiry
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired entries
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<RetrievalResult>>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<RetrievalResult>, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            key.to_string(),
            Entry {
                expires_at: now + ttl,
                value,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str) -> RetrievalResult {
        RetrievalResult {
            doc_id: id.to_string(),
            content: String::new(),
            vector_score: Some(1.0),
            keyword_score: None,
            fused_score: 0.5,
            rerank_score: None,
        }
    }

    #[test]
    fn test_key_is_case_and_whitespace_insensitive() {
        assert_eq!(cache_key("Rust  async\tRuntime", 5), cache_key("rust async runtime ", 5));
        assert_ne!(cache_key("rust", 5), cache_key("rust", 6));
        assert_eq!(cache_key("x", 1).len(), 64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = InMemoryCache::new();
        cache.set("k", vec![result("a")], Duration::from_secs(10)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().unwrap()[0].doc_id, "a");

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.get("k").await.unwrap().is_none());
        assert!(cache.is_empty().await);
        assert_eq!(cache.purge_expired().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_drops_expired_entries() {
        let cache = InMemoryCache::new();
        for i in 0..1000 {
            cache
                .set(&format!("old-{}", i), vec![result("a")], Duration::from_secs(1))
                .await
                .unwrap();
        }

        tokio::time::advance(Duration::from_secs(5)).await;
        cache.set("fresh", vec![result("b")], Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.entries.read().await.len(), 1);
        assert_eq!(cache.purge_expired().await, 0);
    }

    #[tokio::test]
    async fn test_set_is_idempotent() {
        let cache = InMemoryCache::new();
        for _ in 0..3 {
            cache.set("k", vec![result("a")], Duration::from_secs(60)).await.unwrap();
        }
        assert_eq!(cache.len().await, 1);
    }
}
