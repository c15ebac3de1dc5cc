//! Reciprocal Rank Fusion
//!
//! Combines ranked lists from the vector, FTS5, BM25, and (optional) graph
//! searches into one ordering: `score(d) = Σ 1/(k + rank_s(d))` over the
//! sources that returned d. Rank-based fusion sidesteps score normalization
//! across heterogeneous retrieval methods.

use std::collections::{HashMap, HashSet};

// ============================================================================
// CONSTANTS
// ============================================================================

/// RRF smoothing constant. Higher k flattens the advantage of top ranks.
pub const RRF_K: f64 = 60.0;

// ============================================================================
// TYPES
// ============================================================================

/// Retrieval source feeding the fusion stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    Vector,
    Fts,
    Bm25,
    Graph,
}

/// A fused candidate with per-source rank provenance.
#[derive(Debug, Clone)]
pub struct FusedHit {
    pub id: i64,
    pub rrf_score: f64,
    pub in_vector: bool,
    pub in_fts: bool,
    pub in_graph: bool,
    /// Rank (0-based) in each contributing source.
    pub source_ranks: HashMap<SearchSource, usize>,
}

// ============================================================================
// FUSION
// ============================================================================

/// Fuse source-tagged ranked id lists with RRF.
///
/// Duplicate ids within one list are deduplicated before scoring (first
/// occurrence wins the rank). Output is ordered by descending RRF score,
/// ties by ascending id.
pub fn reciprocal_rank_fusion(lists: &[(SearchSource, Vec<i64>)], k: f64) -> Vec<FusedHit> {
    let mut scores: HashMap<i64, f64> = HashMap::new();
    let mut ranks: HashMap<i64, HashMap<SearchSource, usize>> = HashMap::new();

    for (source, ids) in lists {
        let mut seen: HashSet<i64> = HashSet::new();
        let mut rank = 0usize;
        for &id in ids {
            if !seen.insert(id) {
                continue;
            }
            *scores.entry(id).or_default() += 1.0 / (k + rank as f64 + 1.0);
            ranks.entry(id).or_default().insert(*source, rank);
            rank += 1;
        }
    }

    let mut hits: Vec<FusedHit> = scores
        .into_iter()
        .map(|(id, rrf_score)| {
            let source_ranks = ranks.remove(&id).unwrap_or_default();
            FusedHit {
                id,
                rrf_score,
                in_vector: source_ranks.contains_key(&SearchSource::Vector),
                in_fts: source_ranks.contains_key(&SearchSource::Fts)
                    || source_ranks.contains_key(&SearchSource::Bm25),
                in_graph: source_ranks.contains_key(&SearchSource::Graph),
                source_ranks,
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    hits
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_in_multiple_lists_rank_first() {
        let lists = vec![
            (SearchSource::Vector, vec![1, 2, 3]),
            (SearchSource::Fts, vec![2, 4]),
            (SearchSource::Bm25, vec![2, 1]),
        ];
        let hits = reciprocal_rank_fusion(&lists, RRF_K);
        assert_eq!(hits[0].id, 2);
        assert_eq!(hits[1].id, 1);
        assert!(hits[0].in_vector && hits[0].in_fts);
        assert!(!hits[0].in_graph);
    }

    #[test]
    fn rrf_score_is_the_standard_sum() {
        let lists = vec![
            (SearchSource::Vector, vec![7]),
            (SearchSource::Fts, vec![7]),
        ];
        let hits = reciprocal_rank_fusion(&lists, 60.0);
        // Rank 0 in both lists: 2 * 1/(60 + 1)
        assert!((hits[0].rrf_score - 2.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn duplicates_within_a_list_score_once() {
        let lists = vec![(SearchSource::Vector, vec![5, 5, 5])];
        let hits = reciprocal_rank_fusion(&lists, 60.0);
        assert_eq!(hits.len(), 1);
        assert!((hits[0].rrf_score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn ties_break_by_ascending_id() {
        let lists = vec![
            (SearchSource::Vector, vec![9, 3]),
            (SearchSource::Fts, vec![3, 9]),
        ];
        let hits = reciprocal_rank_fusion(&lists, 60.0);
        // Symmetric ranks; equal scores.
        assert_eq!(hits[0].id, 3);
        assert_eq!(hits[1].id, 9);
    }

    #[test]
    fn graph_flag_is_tracked() {
        let lists = vec![(SearchSource::Graph, vec![11])];
        let hits = reciprocal_rank_fusion(&lists, 60.0);
        assert!(hits[0].in_graph);
        assert!(!hits[0].in_vector && !hits[0].in_fts);
    }

    #[test]
    fn empty_input_fuses_to_nothing() {
        assert!(reciprocal_rank_fusion(&[], RRF_K).is_empty());
    }
}
