use serde::{Deserialize, Serialize};

/// A document as indexed by the in-memory stores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub content: String,
}

impl Document {
    pub fn new(doc_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            content: content.into(),
        }
    }
}

/// One hit from a single search source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub content: String,
    pub score: f64,
}

/// A fused, optionally reranked, retrieval result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub doc_id: String,
    pub content: String,
    pub vector_score: Option<f64>,
    pub keyword_score: Option<f64>,
    pub fused_score: f64,
    pub rerank_score: Option<f64>,
}

/// Results plus how they were produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResponse {
    pub results: Vec<RetrievalResult>,
    pub cache_hit: bool,
    pub vector_used: bool,
    pub keyword_used: bool,
    pub rerank_applied: bool,
    /// Some configured source or the reranker failed
    pub fallback_used: bool,
}

impl RetrievalResponse {
    /// Degraded response with no context
    pub fn empty_fallback() -> Self {
        Self {
            fallback_used: true,
            ..Default::default()
        }
    }

    pub fn contents(&self) -> Vec<String> {
        self.results.iter().map(|r| r.content.clone()).collect()
    }

    pub fn doc_ids(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.doc_id.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Results returned when the caller does not ask for a count
    pub default_k: usize,
    /// Upper bound on k; larger requests are clamped
    pub max_k: usize,
    /// Fused candidates passed to the reranker
    pub rerank_top_m: usize,
    pub rrf_constant: f64,
    pub cache_ttl_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 5,
            max_k: 100,
            rerank_top_m: 20,
            rrf_constant: 60.0,
            cache_ttl_secs: 300,
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_k == 0 {
            return Err("retrieval.max_k must be at least 1".to_string());
        }
        if self.default_k == 0 || self.default_k > self.max_k {
            return Err(format!(
                "retrieval.default_k must be between 1 and {}",
                self.max_k
            ));
        }
        if self.rerank_top_m == 0 {
            return Err("retrieval.rerank_top_m must be at least 1".to_string());
        }
        if !self.rrf_constant.is_finite() || self.rrf_constant < 0.0 {
            return Err("retrieval.rrf_constant must be non-negative".to_string());
        }
        Ok(())
    }
}
