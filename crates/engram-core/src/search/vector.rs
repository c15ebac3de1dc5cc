//! Vector index
//!
//! Brute-force cosine scan over embeddings mirrored from the store.
//! Exhaustive scan keeps results fully deterministic: ordering is by
//! descending similarity with ties broken by ascending memory id, which an
//! ANN graph cannot guarantee. Store sizes here are tens of thousands of
//! vectors, well inside brute-force latency budgets.

use std::collections::HashMap;

use crate::embeddings::cosine_similarity;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Vector index error type
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum VectorIndexError {
    #[error("Invalid dimensions: expected {expected}, got {got}")]
    InvalidDimensions { expected: usize, got: usize },
    #[error("Multi-concept search takes 2 to 5 vectors, got {0}")]
    InvalidConceptCount(usize),
}

// ============================================================================
// INDEX
// ============================================================================

/// A vector search hit with similarity in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: i64,
    pub similarity: f32,
}

#[derive(Debug)]
struct VectorEntry {
    vector: Vec<f32>,
    spec_folder: String,
}

/// In-memory cosine index keyed by memory id.
#[derive(Debug)]
pub struct VectorIndex {
    entries: HashMap<i64, VectorEntry>,
    dimensions: Option<usize>,
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorIndex {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            dimensions: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.entries.contains_key(&id)
    }

    /// Insert or replace a vector. The first insert pins the index dimensions.
    pub fn insert(
        &mut self,
        id: i64,
        vector: Vec<f32>,
        spec_folder: &str,
    ) -> Result<(), VectorIndexError> {
        match self.dimensions {
            None => self.dimensions = Some(vector.len()),
            Some(expected) if expected != vector.len() => {
                return Err(VectorIndexError::InvalidDimensions {
                    expected,
                    got: vector.len(),
                });
            }
            Some(_) => {}
        }
        self.entries.insert(
            id,
            VectorEntry {
                vector,
                spec_folder: spec_folder.to_string(),
            },
        );
        Ok(())
    }

    /// Replace the vector for an existing id, keeping its folder.
    pub fn update(&mut self, id: i64, vector: Vec<f32>) -> Result<bool, VectorIndexError> {
        if let Some(expected) = self.dimensions {
            if expected != vector.len() {
                return Err(VectorIndexError::InvalidDimensions {
                    expected,
                    got: vector.len(),
                });
            }
        }
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.vector = vector;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn delete(&mut self, id: i64) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Nearest neighbors by cosine similarity, clamped to [0, 1].
    ///
    /// Ordered by descending similarity, ties by ascending id. The
    /// `spec_folder` predicate applies before `k` is enforced.
    pub fn search(&self, query: &[f32], k: usize, spec_folder: Option<&str>) -> Vec<VectorHit> {
        let mut hits: Vec<VectorHit> = self
            .entries
            .iter()
            .filter(|(_, e)| spec_folder.is_none_or(|f| e.spec_folder == f))
            .map(|(&id, e)| VectorHit {
                id,
                similarity: cosine_similarity(query, &e.vector).clamp(0.0, 1.0),
            })
            .collect();

        sort_hits(&mut hits);
        hits.truncate(k);
        hits
    }

    /// Search with several concept vectors at once (2 to 5).
    ///
    /// Aggregation rule: each memory scores the MAXIMUM similarity across
    /// the concept vectors. Max-similarity (rather than sum-of-ranks) keeps
    /// a memory that nails one concept ahead of one that is mediocre at all
    /// of them.
    pub fn multi_concept_search(
        &self,
        queries: &[Vec<f32>],
        k: usize,
        spec_folder: Option<&str>,
    ) -> Result<Vec<VectorHit>, VectorIndexError> {
        if !(2..=5).contains(&queries.len()) {
            return Err(VectorIndexError::InvalidConceptCount(queries.len()));
        }

        let mut best: HashMap<i64, f32> = HashMap::new();
        for query in queries {
            for hit in self.search(query, k, spec_folder) {
                let entry = best.entry(hit.id).or_insert(f32::MIN);
                if hit.similarity > *entry {
                    *entry = hit.similarity;
                }
            }
        }

        let mut hits: Vec<VectorHit> = best
            .into_iter()
            .map(|(id, similarity)| VectorHit { id, similarity })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }
}

fn sort_hits(hits: &mut [VectorHit]) {
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(angle: f32) -> Vec<f32> {
        vec![angle.cos(), angle.sin()]
    }

    fn seeded() -> VectorIndex {
        let mut index = VectorIndex::new();
        index.insert(1, unit(0.0), "specs/a").unwrap();
        index.insert(2, unit(0.3), "specs/a").unwrap();
        index.insert(3, unit(1.5), "specs/b").unwrap();
        index
    }

    #[test]
    fn search_orders_by_similarity() {
        let index = seeded();
        let hits = index.search(&unit(0.0), 3, None);
        assert_eq!(hits[0].id, 1);
        assert_eq!(hits[1].id, 2);
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn ties_break_by_ascending_id() {
        let mut index = VectorIndex::new();
        // Same vector under three ids, inserted out of order.
        index.insert(9, unit(0.0), "s").unwrap();
        index.insert(2, unit(0.0), "s").unwrap();
        index.insert(5, unit(0.0), "s").unwrap();
        let hits = index.search(&unit(0.0), 3, None);
        assert_eq!(
            hits.iter().map(|h| h.id).collect::<Vec<_>>(),
            vec![2, 5, 9]
        );
    }

    #[test]
    fn similarity_is_clamped_to_unit_interval() {
        let mut index = VectorIndex::new();
        index.insert(1, vec![-1.0, 0.0], "s").unwrap();
        let hits = index.search(&[1.0, 0.0], 1, None);
        assert_eq!(hits[0].similarity, 0.0);
    }

    #[test]
    fn folder_filter_applies_before_k() {
        let index = seeded();
        let hits = index.search(&unit(1.5), 1, Some("specs/b"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 3);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut index = seeded();
        assert!(matches!(
            index.insert(4, vec![1.0, 0.0, 0.0], "s"),
            Err(VectorIndexError::InvalidDimensions { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn update_and_delete() {
        let mut index = seeded();
        assert!(index.update(1, unit(1.5)).unwrap());
        assert!(!index.update(99, unit(1.5)).unwrap());
        assert!(index.delete(2));
        assert!(!index.delete(2));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn multi_concept_takes_max_similarity() {
        let index = seeded();
        let hits = index
            .multi_concept_search(&[unit(0.0), unit(1.5)], 3, None)
            .unwrap();
        // Both id 1 (first concept) and id 3 (second concept) should score ~1.0.
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
        assert!((hits[1].similarity - 1.0).abs() < 1e-5);
        assert_eq!(hits[0].id, 1);
        assert_eq!(hits[1].id, 3);
    }

    #[test]
    fn multi_concept_rejects_bad_counts() {
        let index = seeded();
        assert!(index.multi_concept_search(&[unit(0.0)], 3, None).is_err());
        let six = vec![unit(0.0); 6];
        assert!(index.multi_concept_search(&six, 3, None).is_err());
    }
}
