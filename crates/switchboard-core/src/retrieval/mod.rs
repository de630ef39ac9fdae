//! Hybrid context retrieval
//!
//! Vector and keyword searches run concurrently and are merged with
//! Reciprocal Rank Fusion. The top fused candidates are reranked and the
//! final list is cached by normalized query. Any source may fail; the
//! retriever degrades to whatever is left and tags the response.

pub mod backends;
pub mod cache;
pub mod fusion;
pub mod memory;
pub mod retriever;
pub mod types;

pub use backends::{CacheStore, Embedder, KeywordStore, Reranker, VectorStore};
pub use cache::{InMemoryCache, cache_key, normalize_query};
pub use fusion::{DEFAULT_RRF_CONSTANT, reciprocal_rank_fusion};
pub use memory::{
    HashingEmbedder, InMemoryKeywordStore, InMemoryVectorStore, LexicalReranker,
    cosine_similarity, tokenize,
};
pub use retriever::HybridRetriever;
pub use types::{Document, RetrievalConfig, RetrievalResponse, RetrievalResult, SearchHit};
