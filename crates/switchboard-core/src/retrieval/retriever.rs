//! Hybrid vector + keyword retrieval

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::llm::{RetryPolicy, call_with_retry};

use super::backends::{CacheStore, Embedder, KeywordStore, Reranker, VectorStore};
use super::cache::{InMemoryCache, cache_key};
use super::fusion::reciprocal_rank_fusion;
use super::memory::{HashingEmbedder, InMemoryKeywordStore, InMemoryVectorStore, LexicalReranker};
use super::types::{Document, RetrievalConfig, RetrievalResponse, SearchHit};

/// Result of one search side after retries
enum SideOutcome {
    Hits(Vec<SearchHit>),
    Failed,
    Absent,
}

pub struct HybridRetriever {
    embedder: Arc<dyn Embedder>,
    vector: Arc<dyn VectorStore>,
    keyword: Option<Arc<dyn KeywordStore>>,
    reranker: Option<Arc<dyn Reranker>>,
    cache: Option<Arc<dyn CacheStore>>,
    config: RetrievalConfig,
    retry: RetryPolicy,
}

impl HybridRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, vector: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            vector,
            keyword: None,
            reranker: None,
            cache: None,
            config: RetrievalConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Fully in-process retriever over `documents`
    pub async fn in_memory(documents: Vec<Document>, config: RetrievalConfig) -> Result<Self> {
        let embedder = Arc::new(HashingEmbedder::default());
        let vector = Arc::new(InMemoryVectorStore::new());
        let keyword = Arc::new(InMemoryKeywordStore::new());

        for document in documents {
            if document.content.trim().is_empty() {
                continue;
            }
            let embedding = embedder.embed(&document.content).await?;
            vector.upsert(document.clone(), embedding).await;
            keyword.upsert(document).await;
        }

        Ok(Self::new(embedder, vector)
            .with_keyword_store(keyword)
            .with_reranker(Arc::new(LexicalReranker))
            .with_cache(Arc::new(InMemoryCache::new()))
            .with_config(config))
    }

    pub fn with_keyword_store(mut self, store: Arc<dyn KeywordStore>) -> Self {
        self.keyword = Some(store);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve up to `k` context documents for `query`.
    ///
    /// Empty queries and `k == 0` are rejected before any backend call and
    /// `k` above the configured maximum is clamped. Source failures degrade
    /// the response instead of failing it; only cancellation is an error.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        token: &CancellationToken,
    ) -> Result<RetrievalResponse> {
        if query.trim().is_empty() {
            return Err(Error::Validation("retrieval query must not be empty".to_string()));
        }
        if k == 0 {
            return Err(Error::Validation("retrieval k must be at least 1".to_string()));
        }
        let k = k.min(self.config.max_k);
        let key = cache_key(query, k);

        if let Some(cache) = &self.cache {
            match cache.get(&key).await {
                Ok(Some(results)) => {
                    debug!(k = k, results = results.len(), "Retrieval cache hit");
                    return Ok(RetrievalResponse {
                        rerank_applied: results.iter().any(|r| r.rerank_score.is_some()),
                        vector_used: results.iter().any(|r| r.vector_score.is_some()),
                        keyword_used: results.iter().any(|r| r.keyword_score.is_some()),
                        results,
                        cache_hit: true,
                        fallback_used: false,
                    });
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Cache lookup failed, treating as miss"),
            }
        }

        let fetch = k.max(self.config.rerank_top_m);
        let (vector_side, keyword_side) = tokio::join!(
            self.vector_search(query, fetch, token),
            self.keyword_search(query, fetch, token)
        );
        let vector_side = vector_side?;
        let keyword_side = keyword_side?;

        let mut fallback_used = false;
        let vector_hits = match vector_side {
            SideOutcome::Hits(hits) => Some(hits),
            SideOutcome::Failed => {
                fallback_used = true;
                None
            }
            SideOutcome::Absent => None,
        };
        let keyword_hits = match keyword_side {
            SideOutcome::Hits(hits) => Some(hits),
            SideOutcome::Failed => {
                fallback_used = true;
                None
            }
            SideOutcome::Absent => None,
        };

        if vector_hits.is_none() && keyword_hits.is_none() {
            warn!("All retrieval sources failed, continuing without context");
            return Ok(RetrievalResponse::empty_fallback());
        }

        let mut results = reciprocal_rank_fusion(
            vector_hits.as_deref().unwrap_or(&[]),
            keyword_hits.as_deref().unwrap_or(&[]),
            self.config.rrf_constant,
        );
        results.truncate(self.config.rerank_top_m.max(k));

        let mut rerank_applied = false;
        if let Some(reranker) = &self.reranker {
            if !results.is_empty() {
                let scores = join_all(results.iter().map(|r| {
                    call_with_retry(&self.retry, token, "rerank", move || {
                        reranker.score(query, &r.content)
                    })
                }))
                .await;

                let mut collected = Vec::with_capacity(scores.len());
                let mut failed = None;
                for score in scores {
                    match score {
                        Ok(s) => collected.push(s),
                        Err(Error::Cancelled) => return Err(Error::Cancelled),
                        Err(e) => {
                            failed = Some(e);
                            break;
                        }
                    }
                }

                match failed {
                    Some(e) => {
                        warn!(error = %e, "Rerank failed, keeping fused order");
                        fallback_used = true;
                    }
                    None => {
                        for (result, score) in results.iter_mut().zip(collected) {
                            result.rerank_score = Some(score);
                        }
                        results.sort_by(|a, b| {
                            b.rerank_score
                                .unwrap_or(0.0)
                                .total_cmp(&a.rerank_score.unwrap_or(0.0))
                                .then_with(|| b.fused_score.total_cmp(&a.fused_score))
                                .then_with(|| a.doc_id.cmp(&b.doc_id))
                        });
                        rerank_applied = true;
                    }
                }
            }
        }

        results.truncate(k);

        if !fallback_used {
            if let Some(cache) = &self.cache {
                let ttl = Duration::from_secs(self.config.cache_ttl_secs);
                if let Err(e) = cache.set(&key, results.clone(), ttl).await {
                    warn!(error = %e, "Cache write failed");
                }
            }
        }

        debug!(
            k = k,
            results = results.len(),
            vector = vector_hits.is_some(),
            keyword = keyword_hits.is_some(),
            rerank = rerank_applied,
            fallback = fallback_used,
            "Retrieval complete"
        );

        Ok(RetrievalResponse {
            results,
            cache_hit: false,
            vector_used: vector_hits.is_some(),
            keyword_used: keyword_hits.is_some(),
            rerank_applied,
            fallback_used,
        })
    }

    async fn vector_search(
        &self,
        query: &str,
        k: usize,
        token: &CancellationToken,
    ) -> Result<SideOutcome> {
        let embedded =
            call_with_retry(&self.retry, token, "embed", || self.embedder.embed(query)).await;
        let embedding = match embedded {
            Ok(embedding) => embedding,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                warn!(
                    embedder = self.embedder.name(),
                    error = %e,
                    "Embedding failed, vector search skipped"
                );
                return Ok(SideOutcome::Failed);
            }
        };

        match call_with_retry(&self.retry, token, "vector_search", || {
            self.vector.search(&embedding, k)
        })
        .await
        {
            Ok(hits) => Ok(SideOutcome::Hits(hits)),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                warn!(error = %e, "Vector search failed");
                Ok(SideOutcome::Failed)
            }
        }
    }

    async fn keyword_search(
        &self,
        query: &str,
        k: usize,
        token: &CancellationToken,
    ) -> Result<SideOutcome> {
        let Some(store) = &self.keyword else {
            return Ok(SideOutcome::Absent);
        };
        match call_with_retry(&self.retry, token, "keyword_search", || store.search(query, k)).await {
            Ok(hits) => Ok(SideOutcome::Hits(hits)),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                warn!(error = %e, "Keyword search failed, continuing vector-only");
                Ok(SideOutcome::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempt_timeout_ms: 200,
            backoff_ms: 1,
            max_backoff_ms: 2,
            max_attempts: 2,
        }
    }

    /// Fixed hit list with a call counter and optional outage
    struct ScriptedStore {
        hits: Vec<SearchHit>,
        calls: AtomicU32,
        fail: bool,
    }

    impl ScriptedStore {
        fn new(ids: &[&str]) -> Self {
            Self {
                hits: ids
                    .iter()
                    .enumerate()
                    .map(|(i, id)| SearchHit {
                        doc_id: id.to_string(),
                        content: format!("document {}", id),
                        score: 1.0 / (i as f64 + 1.0),
                    })
                    .collect(),
                calls: AtomicU32::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(&[])
            }
        }

        fn respond(&self, k: usize) -> Result<Vec<SearchHit>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::BackendUnavailable("store down".to_string()));
            }
            Ok(self.hits.iter().take(k).cloned().collect())
        }
    }

    #[async_trait]
    impl VectorStore for ScriptedStore {
        async fn search(&self, _embedding: &[f32], k: usize) -> Result<Vec<SearchHit>> {
            self.respond(k)
        }
    }

    #[async_trait]
    impl KeywordStore for ScriptedStore {
        async fn search(&self, _query: &str, k: usize) -> Result<Vec<SearchHit>> {
            self.respond(k)
        }
    }

    struct FailingReranker;

    #[async_trait]
    impl Reranker for FailingReranker {
        async fn score(&self, _query: &str, _candidate: &str) -> Result<f64> {
            Err(Error::BackendTimeout("reranker".to_string()))
        }
    }

    fn retriever(vector: Arc<ScriptedStore>) -> HybridRetriever {
        HybridRetriever::new(Arc::new(HashingEmbedder::default()), vector).with_retry(fast_retry())
    }

    #[tokio::test]
    async fn test_empty_query_rejected_without_backend_call() {
        let vector = Arc::new(ScriptedStore::new(&["a"]));
        let r = retriever(vector.clone());
        let token = CancellationToken::new();

        let err = r.retrieve("   ", 5, &token).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(matches!(r.retrieve("q", 0, &token).await, Err(Error::Validation(_))));
        assert_eq!(vector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_keyword_failure_degrades_to_vector_only() {
        let vector = Arc::new(ScriptedStore::new(&["a", "b", "c"]));
        let keyword = Arc::new(ScriptedStore::failing());
        let r = retriever(vector).with_keyword_store(keyword.clone());
        let token = CancellationToken::new();

        let response = r.retrieve("anything", 2, &token).await.unwrap();
        assert_eq!(response.doc_ids(), vec!["a", "b"]);
        assert!(response.vector_used);
        assert!(!response.keyword_used);
        assert!(response.fallback_used);
        // one retry
        assert_eq!(keyword.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_absent_keyword_store_is_not_a_fallback() {
        let r = retriever(Arc::new(ScriptedStore::new(&["a"])));
        let token = CancellationToken::new();
        let response = r.retrieve("anything", 3, &token).await.unwrap();
        assert_eq!(response.results.len(), 1);
        assert!(!response.fallback_used);
    }

    #[tokio::test]
    async fn test_both_sources_failing_returns_empty_context() {
        let r = retriever(Arc::new(ScriptedStore::failing()))
            .with_keyword_store(Arc::new(ScriptedStore::failing()));
        let token = CancellationToken::new();
        let response = r.retrieve("anything", 3, &token).await.unwrap();
        assert!(response.results.is_empty());
        assert!(response.fallback_used);
    }

    #[tokio::test]
    async fn test_fusion_combines_sources() {
        let r = retriever(Arc::new(ScriptedStore::new(&["a", "b"])))
            .with_keyword_store(Arc::new(ScriptedStore::new(&["b", "c"])));
        let token = CancellationToken::new();
        let response = r.retrieve("anything", 3, &token).await.unwrap();
        assert_eq!(response.doc_ids(), vec!["b", "a", "c"]);
        assert!(response.keyword_used && response.vector_used);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_backends() {
        let vector = Arc::new(ScriptedStore::new(&["a", "b"]));
        let r = retriever(vector.clone()).with_cache(Arc::new(InMemoryCache::new()));
        let token = CancellationToken::new();

        let first = r.retrieve("Rust async", 2, &token).await.unwrap();
        let second = r.retrieve("  rust   ASYNC ", 2, &token).await.unwrap();
        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.results, second.results);
        assert_eq!(vector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_degraded_results_not_cached() {
        let vector = Arc::new(ScriptedStore::new(&["a"]));
        let r = retriever(vector.clone())
            .with_keyword_store(Arc::new(ScriptedStore::failing()))
            .with_cache(Arc::new(InMemoryCache::new()));
        let token = CancellationToken::new();

        r.retrieve("q", 1, &token).await.unwrap();
        let again = r.retrieve("q", 1, &token).await.unwrap();
        assert!(!again.cache_hit);
        assert_eq!(vector.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rerank_failure_keeps_fused_order() {
        let r = retriever(Arc::new(ScriptedStore::new(&["a", "b"])))
            .with_reranker(Arc::new(FailingReranker));
        let token = CancellationToken::new();
        let response = r.retrieve("q", 2, &token).await.unwrap();
        assert_eq!(response.doc_ids(), vec!["a", "b"]);
        assert!(!response.rerank_applied);
        assert!(response.fallback_used);
    }

    #[tokio::test]
    async fn test_k_is_clamped() {
        let ids: Vec<String> = (0..10).map(|i| format!("d{}", i)).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let r = retriever(Arc::new(ScriptedStore::new(&refs))).with_config(RetrievalConfig {
            max_k: 3,
            default_k: 2,
            ..Default::default()
        });
        let token = CancellationToken::new();
        let response = r.retrieve("q", 1000, &token).await.unwrap();
        assert_eq!(response.results.len(), 3);
    }

    #[tokio::test]
    async fn test_in_memory_end_to_end() {
        let docs = vec![
            Document::new("bandit", "Thompson sampling draws from a Beta posterior per arm"),
            Document::new("cache", "A TTL cache stores retrieval results keyed by query"),
            Document::new("rrf", "Reciprocal rank fusion merges ranked lists"),
        ];
        let r = HybridRetriever::in_memory(docs, RetrievalConfig::default()).await.unwrap();
        let token = CancellationToken::new();
        let response = r.retrieve("thompson sampling posterior", 2, &token).await.unwrap();
        assert_eq!(response.results[0].doc_id, "bandit");
        assert!(response.rerank_applied);
        assert!(!response.fallback_used);
    }
}
