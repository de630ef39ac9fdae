//! Collaborator contracts consumed by the retriever

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

use super::types::{RetrievalResult, SearchHit};

/// Turns text into a dense vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn name(&self) -> &str;
}

/// Nearest-neighbour search over embeddings
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<SearchHit>>;
}

/// Lexical (BM25-style) search
#[async_trait]
pub trait KeywordStore: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>>;
}

/// Cross-encoder relevance scoring
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn score(&self, query: &str, candidate: &str) -> Result<f64>;
}

/// Key-value store for finished retrieval results
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<RetrievalResult>>>;

    async fn set(&self, key: &str, value: Vec<RetrievalResult>, ttl: Duration) -> Result<()>;
}
