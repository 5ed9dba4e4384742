//! Candidate ranking and relevance filtering.
//!
//! The retrieval stage embeds the rewritten query, asks a [`VectorStore`]
//! for candidates, and hands them to [`rank_candidates`], which owns the
//! ordering contract:
//!
//! 1. Sort by score (desc), document recency (desc), document id (asc),
//!    chunk id (asc).
//! 2. Drop candidates scoring below the threshold.
//! 3. Optionally drop candidates sharing no keyword with the query.
//! 4. Truncate to `top_k` and assign 1-based ranks.
//!
//! [`VectorStore`]: crate::store::VectorStore

use std::cmp::Ordering;

use crate::models::{RetrievedChunk, RewrittenQuery, ScoredChunk};

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    /// Maximum chunks handed to generation.
    pub top_k: usize,
    /// Minimum acceptable similarity (inclusive).
    pub similarity_threshold: f64,
    /// Backend is asked for `top_k * candidate_multiplier` candidates.
    pub candidate_multiplier: usize,
    /// Require at least one query keyword in the chunk text.
    pub keyword_filter: bool,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k: 3,
            similarity_threshold: 0.3,
            candidate_multiplier: 2,
            keyword_filter: false,
        }
    }
}

impl RetrievalParams {
    pub fn candidate_count(&self) -> usize {
        self.top_k.saturating_mul(self.candidate_multiplier.max(1))
    }
}

/// Result of one retrieval call.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub chunks: Vec<RetrievedChunk>,
    /// Candidates returned by the backend before filtering.
    pub candidates_seen: usize,
}

impl RetrievalOutcome {
    /// True when nothing qualified. This is a valid outcome, not an error.
    pub fn no_context(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Ranking order: score desc, document recency desc, document id asc,
/// chunk id asc. Backends that cut their result to `k` must sort with
/// this first, or a tie at the cut can drop the newer chunk.
pub fn compare_candidates(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(b.chunk.document_updated_at.cmp(&a.chunk.document_updated_at))
        .then_with(|| a.chunk.document_id.cmp(&b.chunk.document_id))
        .then_with(|| a.chunk.id.cmp(&b.chunk.id))
}

fn mentions_any(text: &str, keywords: &[String]) -> bool {
    let lower = text.to_lowercase();
    keywords.iter().any(|k| lower.contains(&k.to_lowercase()))
}

/// Apply ordering, threshold, optional lexical filter and `top_k`.
pub fn rank_candidates(
    mut candidates: Vec<ScoredChunk>,
    query: &RewrittenQuery,
    params: &RetrievalParams,
) -> RetrievalOutcome {
    let candidates_seen = candidates.len();
    if params.top_k == 0 {
        return RetrievalOutcome {
            chunks: Vec::new(),
            candidates_seen,
        };
    }

    candidates.sort_by(compare_candidates);

    let lexical = params.keyword_filter && !query.keywords.is_empty();
    let chunks = candidates
        .into_iter()
        .filter(|c| !c.score.is_nan() && c.score >= params.similarity_threshold)
        .filter(|c| !lexical || mentions_any(&c.chunk.text, &query.keywords))
        .take(params.top_k)
        .enumerate()
        .map(|(i, c)| RetrievedChunk {
            chunk: c.chunk,
            score: c.score,
            rank: i + 1,
        })
        .collect();

    RetrievalOutcome {
        chunks,
        candidates_seen,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn cand(id: &str, doc: &str, updated: i64, score: f64) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: id.into(),
                document_id: doc.into(),
                position: 0,
                text: format!("chunk {} about {}", id, doc),
                document_updated_at: updated,
            },
            score,
        }
    }

    fn params(k: usize, threshold: f64) -> RetrievalParams {
        RetrievalParams {
            top_k: k,
            similarity_threshold: threshold,
            ..Default::default()
        }
    }

    #[test]
    fn test_sorted_descending_and_above_threshold() {
        let cands = vec![
            cand("c1", "d1", 0, 0.2),
            cand("c2", "d2", 0, 0.9),
            cand("c3", "d3", 0, 0.5),
            cand("c4", "d4", 0, 0.3),
        ];
        let out = rank_candidates(cands, &RewrittenQuery::default(), &params(10, 0.3));
        let ids: Vec<&str> = out.chunks.iter().map(|c| c.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c3", "c4"]);
        for pair in out.chunks.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        assert!(out.chunks.iter().all(|c| c.score >= 0.3));
        assert_eq!(out.candidates_seen, 4);
    }

    #[test]
    fn test_ranks_are_one_based_and_bounded_by_k() {
        let cands = (0..10)
            .map(|i| cand(&format!("c{}", i), "d", 0, 0.9 - i as f64 * 0.01))
            .collect();
        let out = rank_candidates(cands, &RewrittenQuery::default(), &params(3, 0.0));
        assert_eq!(out.chunks.len(), 3);
        assert_eq!(
            out.chunks.iter().map(|c| c.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_k_zero_is_empty_not_error() {
        let out = rank_candidates(
            vec![cand("c1", "d1", 0, 0.99)],
            &RewrittenQuery::default(),
            &params(0, 0.0),
        );
        assert!(out.no_context());
    }

    #[test]
    fn test_threshold_applies_even_within_top_k() {
        let out = rank_candidates(
            vec![cand("c1", "d1", 0, 0.29)],
            &RewrittenQuery::default(),
            &params(3, 0.3),
        );
        assert!(out.no_context());
    }

    #[test]
    fn test_tie_break_recency_then_document_id() {
        let cands = vec![
            cand("x", "b-doc", 100, 0.5),
            cand("y", "a-doc", 100, 0.5),
            cand("z", "c-doc", 200, 0.5),
        ];
        let out = rank_candidates(cands, &RewrittenQuery::default(), &params(3, 0.0));
        let ids: Vec<&str> = out.chunks.iter().map(|c| c.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "y", "x"]);
    }

    #[test]
    fn test_ordering_is_input_order_independent() {
        let a = vec![
            cand("x", "d1", 1, 0.5),
            cand("y", "d1", 1, 0.5),
            cand("z", "d2", 1, 0.7),
        ];
        let mut b = a.clone();
        b.reverse();
        let q = RewrittenQuery::default();
        let ra = rank_candidates(a, &q, &params(3, 0.0));
        let rb = rank_candidates(b, &q, &params(3, 0.0));
        assert_eq!(ra.chunks, rb.chunks);
    }

    #[test]
    fn test_keyword_filter() {
        let q = RewrittenQuery {
            keywords: vec!["D2".into()],
            ..Default::default()
        };
        let cands = vec![cand("c1", "d1", 0, 0.9), cand("c2", "d2", 0, 0.8)];
        let mut p = params(3, 0.0);
        p.keyword_filter = true;
        let out = rank_candidates(cands.clone(), &q, &p);
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.chunks[0].chunk.id, "c2");
        assert_eq!(out.chunks[0].rank, 1);

        // No keywords: the lexical filter is skipped.
        let out = rank_candidates(cands, &RewrittenQuery::default(), &p);
        assert_eq!(out.chunks.len(), 2);
    }

    #[test]
    fn test_nan_scores_dropped() {
        let out = rank_candidates(
            vec![cand("c1", "d1", 0, f64::NAN), cand("c2", "d2", 0, 0.4)],
            &RewrittenQuery::default(),
            &params(3, -1.0),
        );
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.chunks[0].chunk.id, "c2");
    }

    #[test]
    fn test_candidate_count() {
        let p = RetrievalParams {
            top_k: 3,
            candidate_multiplier: 0,
            ..Default::default()
        };
        assert_eq!(p.candidate_count(), 3);
        assert_eq!(params(4, 0.0).candidate_count(), 8);
    }
}
