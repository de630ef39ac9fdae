//! Reciprocal Rank Fusion

use std::collections::HashMap;

use super::types::{RetrievalResult, SearchHit};

pub const DEFAULT_RRF_CONSTANT: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Vector,
    Keyword,
}

/// Fuse two ranked lists.
///
/// `fused(doc) = Σ 1 / (rank + c)` over the lists the document appears in,
/// with 1-based ranks. Only a document's first occurrence in a list counts.
/// Output is ordered by fused score, ties by `doc_id`.
pub fn reciprocal_rank_fusion(
    vector_hits: &[SearchHit],
    keyword_hits: &[SearchHit],
    c: f64,
) -> Vec<RetrievalResult> {
    let mut fused: HashMap<&str, RetrievalResult> = HashMap::new();

    for (source, hits) in [(Source::Vector, vector_hits), (Source::Keyword, keyword_hits)] {
        let mut rank = 0usize;
        for hit in hits {
            let entry = fused
                .entry(hit.doc_id.as_str())
                .or_insert_with(|| RetrievalResult {
                    doc_id: hit.doc_id.clone(),
                    content: hit.content.clone(),
                    vector_score: None,
                    keyword_score: None,
                    fused_score: 0.0,
                    rerank_score: None,
                });

            let slot = match source {
                Source::Vector => &mut entry.vector_score,
                Source::Keyword => &mut entry.keyword_score,
            };
            if slot.is_some() {
                continue;
            }
            *slot = Some(hit.score);
            rank += 1;
            entry.fused_score += 1.0 / (rank as f64 + c);
        }
    }

    let mut results: Vec<RetrievalResult> = fused.into_values().collect();
    results.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
    results
}
