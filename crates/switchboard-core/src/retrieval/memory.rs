//! In-process retrieval collaborators for offline runs and tests

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

use super::backends::{Embedder, KeywordStore, Reranker, VectorStore};
use super::types::{Document, SearchHit};

/// Lowercased alphanumeric tokens
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Feature-hashing bag-of-words embedder
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dims: 256 }
    }
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() % self.dims as u64) as usize
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Err(Error::EmbeddingFailed("no tokens to embed".to_string()));
        }
        let mut vector = vec![0.0f32; self.dims];
        for token in &tokens {
            vector[self.bucket(token)] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(vector)
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

/// Brute-force cosine search
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<Vec<(Document, Vec<f32>)>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document
    pub async fn upsert(&self, document: Document, embedding: Vec<f32>) {
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|(d, _)| d.doc_id == document.doc_id) {
            Some(slot) => *slot = (document, embedding),
            None => entries.push((document, embedding)),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let entries = self.entries.read().await;
        let mut hits: Vec<SearchHit> = entries
            .iter()
            .map(|(doc, stored)| SearchHit {
                doc_id: doc.doc_id.clone(),
                content: doc.content.clone(),
                score: cosine_similarity(embedding, stored) as f64,
            })
            .filter(|hit| hit.score > 0.0)
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.doc_id.cmp(&b.doc_id)));
        hits.truncate(k);
        Ok(hits)
    }
}

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

struct IndexedDocument {
    document: Document,
    term_counts: HashMap<String, usize>,
    length: usize,
}

/// Okapi BM25 over an in-memory corpus
#[derive(Default)]
pub struct InMemoryKeywordStore {
    docs: RwLock<Vec<IndexedDocument>>,
}

impl InMemoryKeywordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, document: Document) {
        let tokens = tokenize(&document.content);
        let mut term_counts = HashMap::new();
        for token in &tokens {
            *term_counts.entry(token.clone()).or_insert(0) += 1;
        }
        let indexed = IndexedDocument {
            length: tokens.len(),
            term_counts,
            document,
        };

        let mut docs = self.docs.write().await;
        match docs
            .iter_mut()
            .find(|d| d.document.doc_id == indexed.document.doc_id)
        {
            Some(slot) => *slot = indexed,
            None => docs.push(indexed),
        }
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KeywordStore for InMemoryKeywordStore {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let docs = self.docs.read().await;
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let terms: HashSet<String> = tokenize(query).into_iter().collect();
        let n = docs.len() as f64;
        let avg_len = docs.iter().map(|d| d.length).sum::<usize>() as f64 / n;

        let idf: HashMap<&str, f64> = terms
            .iter()
            .map(|t| {
                let df = docs.iter().filter(|d| d.term_counts.contains_key(t)).count() as f64;
                (t.as_str(), ((n - df + 0.5) / (df + 0.5) + 1.0).ln())
            })
            .collect();

        let mut hits: Vec<SearchHit> = docs
            .iter()
            .filter_map(|d| {
                let len_norm = 1.0 - BM25_B + BM25_B * d.length as f64 / avg_len.max(1.0);
                let score: f64 = terms
                    .iter()
                    .filter_map(|t| {
                        let tf = *d.term_counts.get(t)? as f64;
                        let weight = idf.get(t.as_str()).copied().unwrap_or(0.0);
                        Some(weight * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * len_norm))
                    })
                    .sum();
                (score > 0.0).then(|| SearchHit {
                    doc_id: d.document.doc_id.clone(),
                    content: d.document.content.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.doc_id.cmp(&b.doc_id)));
        hits.truncate(k);
        Ok(hits)
    }
}

/// Token-overlap relevance scorer standing in for a cross-encoder
#[derive(Debug, Clone, Default)]
pub struct LexicalReranker;

#[async_trait]
impl Reranker for LexicalReranker {
    async fn score(&self, query: &str, candidate: &str) -> Result<f64> {
        let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
        let candidate_terms: HashSet<String> = tokenize(candidate).into_iter().collect();
        if query_terms.is_empty() || candidate_terms.is_empty() {
            return Ok(0.0);
        }
        let shared = query_terms.intersection(&candidate_terms).count() as f64;
        let coverage = shared / query_terms.len() as f64;
        let jaccard = shared / query_terms.union(&candidate_terms).count() as f64;
        Ok((0.8 * coverage + 0.2 * jaccard).clamp(0.0, 1.0))
    }
}
