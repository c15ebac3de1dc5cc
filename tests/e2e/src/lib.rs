//! Shared test harness for the end-to-end suite.
//!
//! Provides deterministic embedding providers so similarity values can be
//! pinned exactly where a scenario needs them.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use engram_core::{
    EmbeddingError, EmbeddingProvider, EmbeddingService, EngineConfig, Memory, MemoryInput, Store,
};
use tempfile::TempDir;

/// Embedding dimension used by the test providers.
pub const DIM: usize = 4;

/// Provider with an explicit content → vector map; unmapped content falls
/// back to a normalized byte-histogram vector.
pub struct MappedProvider {
    map: HashMap<String, Vec<f32>>,
}

impl MappedProvider {
    pub fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            map: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }
}

impl EmbeddingProvider for MappedProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if let Some(v) = self.map.get(text) {
            return Ok(v.clone());
        }
        Ok(hash_vector(text))
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// Deterministic fallback vector derived from the text bytes.
pub fn hash_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    for (i, b) in text.bytes().enumerate() {
        v[i % DIM] += (b as f32) / 255.0;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// A unit vector at the given cosine similarity to `[1, 0, 0, 0]`.
pub fn at_similarity(cos: f32) -> Vec<f32> {
    let sin = (1.0 - cos * cos).max(0.0).sqrt();
    vec![cos, sin, 0.0, 0.0]
}

/// Open a store in a fresh temp dir with the given provider map.
pub fn store_with_map(
    relations: bool,
    entries: &[(&str, Vec<f32>)],
) -> (Arc<Store>, TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engram.db");
    let mut config = EngineConfig::default();
    config.relations_enabled = relations;
    let store = Store::open(
        Some(path.clone()),
        config,
        EmbeddingService::with_provider(Box::new(MappedProvider::new(entries))),
    )
    .unwrap();
    (Arc::new(store), dir, path)
}

/// Minimal memory input under `specs/demo`.
pub fn input(anchor: &str, content: &str) -> MemoryInput {
    MemoryInput {
        spec_folder: "specs/demo".to_string(),
        file_path: "memory/demo.md".to_string(),
        anchor_id: anchor.to_string(),
        title: format!("memory {anchor}"),
        content: content.to_string(),
        ..Default::default()
    }
}

/// Seed a memory and return it.
pub fn seed(store: &Store, anchor: &str, content: &str) -> Memory {
    store.insert_memory(&input(anchor, content)).unwrap()
}
