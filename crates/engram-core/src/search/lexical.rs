//! Lexical search plumbing
//!
//! Two cooperating sub-indexes serve the lexical path: the SQLite FTS5
//! virtual table (queried through the store) and the in-process BM25 index.
//! This module owns query escaping and the merge of the two result lists.

use std::collections::HashMap;

use super::bm25::Bm25Hit;

// ============================================================================
// QUERY ESCAPING
// ============================================================================

/// Make an arbitrary user string safe as an FTS5 MATCH expression.
///
/// Operator characters (`*:()"'`) are stripped and every token is phrase-
/// quoted, which also neutralizes the bare keywords `AND`/`OR`/`NOT`.
/// Tokens are OR-joined so any matching term ranks; BM25 ordering still
/// rewards documents matching more of them. Returns an empty string when
/// nothing searchable remains.
pub fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|token| {
            token
                .chars()
                .filter(|c| !matches!(c, '*' | ':' | '(' | ')' | '"' | '\''))
                .collect::<String>()
        })
        .filter(|token| !token.is_empty())
        .map(|token| format!("\"{}\"", token))
        .collect::<Vec<_>>()
        .join(" OR ")
}

// ============================================================================
// COMBINED LEXICAL RESULTS
// ============================================================================

/// Which sub-index produced a lexical hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LexicalSource {
    Fts5,
    Bm25,
    Both,
}

/// A merged lexical search result.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub id: i64,
    pub fts_score: Option<f64>,
    pub bm25_score: Option<f32>,
    /// Present only when both sources contributed; mean of the two
    /// min-max-normalized scores. Single-source hits carry the raw score
    /// in its own field and no combined score.
    pub combined_score: Option<f64>,
    pub source: LexicalSource,
}

/// Merge FTS5 and BM25 result lists, deduplicating by id.
///
/// Ordering: hits present in both sources first (by combined score), then
/// single-source hits by their normalized score; ties by ascending id.
pub fn combine_lexical(fts: &[(i64, f64)], bm25: &[Bm25Hit]) -> Vec<LexicalHit> {
    let fts_norm = normalize(fts.iter().map(|(id, s)| (*id, *s)));
    let bm25_norm = normalize(bm25.iter().map(|h| (h.id, h.score as f64)));

    let fts_raw: HashMap<i64, f64> = fts.iter().copied().collect();
    let bm25_raw: HashMap<i64, f32> = bm25.iter().map(|h| (h.id, h.score)).collect();

    let mut ids: Vec<i64> = fts_norm.keys().chain(bm25_norm.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();

    let mut hits: Vec<LexicalHit> = ids
        .into_iter()
        .map(|id| {
            let f = fts_norm.get(&id);
            let b = bm25_norm.get(&id);
            let (source, combined) = match (f, b) {
                (Some(f), Some(b)) => (LexicalSource::Both, Some((f + b) / 2.0)),
                (Some(_), None) => (LexicalSource::Fts5, None),
                (None, Some(_)) => (LexicalSource::Bm25, None),
                (None, None) => unreachable!("id came from one of the maps"),
            };
            LexicalHit {
                id,
                fts_score: fts_raw.get(&id).copied(),
                bm25_score: bm25_raw.get(&id).copied(),
                combined_score: combined,
                source,
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        let rank_a = sort_key(a, &fts_norm, &bm25_norm);
        let rank_b = sort_key(b, &fts_norm, &bm25_norm);
        rank_b
            .partial_cmp(&rank_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    hits
}

fn sort_key(
    hit: &LexicalHit,
    fts_norm: &HashMap<i64, f64>,
    bm25_norm: &HashMap<i64, f64>,
) -> f64 {
    match hit.combined_score {
        // Dual-source hits outrank single-source ones at equal score.
        Some(c) => 1.0 + c,
        None => *fts_norm
            .get(&hit.id)
            .or_else(|| bm25_norm.get(&hit.id))
            .unwrap_or(&0.0),
    }
}

/// Min-max normalize scores to [0, 1]; a degenerate range maps to 1.0.
fn normalize(scores: impl Iterator<Item = (i64, f64)>) -> HashMap<i64, f64> {
    let collected: Vec<(i64, f64)> = scores.collect();
    if collected.is_empty() {
        return HashMap::new();
    }
    let min = collected.iter().map(|(_, s)| *s).fold(f64::INFINITY, f64::min);
    let max = collected
        .iter()
        .map(|(_, s)| *s)
        .fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    collected
        .into_iter()
        .map(|(id, s)| {
            let n = if range <= f64::EPSILON {
                1.0
            } else {
                (s - min) / range
            };
            (id, n)
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
