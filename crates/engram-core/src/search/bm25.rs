//! In-process BM25 index
//!
//! Okapi BM25 over tokenized memory content, rebuilt from the store at
//! startup and maintained incrementally on writes. Documents shorter than
//! [`MIN_DOC_LENGTH`] characters are excluded at index time; fragments that
//! small rank on noise.

use std::collections::HashMap;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Term-frequency saturation.
pub const BM25_K1: f32 = 1.2;

/// Length normalization.
pub const BM25_B: f32 = 0.75;

/// Minimum canonical-text length (chars) for a document to be indexed.
pub const MIN_DOC_LENGTH: usize = 20;

// ============================================================================
// INDEX
// ============================================================================

/// A BM25 search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Bm25Hit {
    pub id: i64,
    pub score: f32,
}

#[derive(Debug)]
struct DocEntry {
    token_count: usize,
    term_freqs: HashMap<String, u32>,
    spec_folder: String,
}

/// Incremental Okapi BM25 index keyed by memory id.
#[derive(Debug, Default)]
pub struct Bm25Index {
    docs: HashMap<i64, DocEntry>,
    doc_freqs: HashMap<String, u32>,
    total_tokens: u64,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Index a document. Re-inserting an id replaces the previous text.
    /// Texts below [`MIN_DOC_LENGTH`] chars are skipped (and any previous
    /// entry for the id removed).
    pub fn insert(&mut self, id: i64, text: &str, spec_folder: &str) {
        self.remove(id);

        if text.chars().count() < MIN_DOC_LENGTH {
            return;
        }

        let tokens = tokenize(text);
        if tokens.is_empty() {
            return;
        }

        let mut term_freqs: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *term_freqs.entry(token.clone()).or_default() += 1;
        }
        for term in term_freqs.keys() {
            *self.doc_freqs.entry(term.clone()).or_default() += 1;
        }
        self.total_tokens += tokens.len() as u64;
        self.docs.insert(
            id,
            DocEntry {
                token_count: tokens.len(),
                term_freqs,
                spec_folder: spec_folder.to_string(),
            },
        );
    }

    /// Drop a document from the index. Unknown ids are a no-op.
    pub fn remove(&mut self, id: i64) {
        if let Some(entry) = self.docs.remove(&id) {
            for term in entry.term_freqs.keys() {
                if let Some(df) = self.doc_freqs.get_mut(term) {
                    *df = df.saturating_sub(1);
                    if *df == 0 {
                        self.doc_freqs.remove(term);
                    }
                }
            }
            self.total_tokens -= entry.token_count as u64;
        }
    }

    /// Rank documents for `query`, best first. Ties break by ascending id.
    /// `spec_folder` filters before the limit is applied.
    pub fn search(&self, query: &str, limit: usize, spec_folder: Option<&str>) -> Vec<Bm25Hit> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() || self.docs.is_empty() {
            return vec![];
        }

        let n = self.docs.len() as f32;
        let avg_len = self.total_tokens as f32 / n;

        let mut hits: Vec<Bm25Hit> = self
            .docs
            .iter()
            .filter(|(_, doc)| spec_folder.is_none_or(|f| doc.spec_folder == f))
            .filter_map(|(&id, doc)| {
                let mut score = 0.0f32;
                for term in &query_terms {
                    let tf = *doc.term_freqs.get(term).unwrap_or(&0) as f32;
                    if tf == 0.0 {
                        continue;
                    }
                    let df = *self.doc_freqs.get(term).unwrap_or(&0) as f32;
                    let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                    let denom = tf
                        + BM25_K1 * (1.0 - BM25_B + BM25_B * doc.token_count as f32 / avg_len);
                    score += idf * tf * (BM25_K1 + 1.0) / denom;
                }
                (score > 0.0).then_some(Bm25Hit { id, score })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        hits
    }
}

/// Lowercased alphanumeric tokens.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
