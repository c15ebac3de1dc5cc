//! Retrieval pipeline
//!
//! The read path in order: query expansion (fuzzy), vector + lexical
//! (FTS5/BM25) retrieval, RRF fusion, composite scoring, and optional
//! cross-encoder reranking.

pub mod bm25;
pub mod fusion;
pub mod fuzzy;
pub mod lexical;
pub mod reranker;
pub mod scoring;
pub mod vector;

pub use bm25::{Bm25Hit, Bm25Index, MIN_DOC_LENGTH};
pub use fusion::{reciprocal_rank_fusion, FusedHit, SearchSource, RRF_K};
pub use fuzzy::{
    correct_typo, expand_query, find_fuzzy_acronym, levenshtein, ExpandOptions, FuzzyMatch,
    QueryExpansion, ACRONYM_MAP, MAX_EDIT_DISTANCE, MIN_FUZZY_TERM_LENGTH,
};
pub use lexical::{combine_lexical, escape_fts_query, LexicalHit, LexicalSource};
pub use reranker::{
    cache_key, length_penalty, CrossEncoderReranker, RerankCandidate, RerankMetadata,
    RerankOptions, RerankOutcome, RerankProvider, RerankedDoc, CACHE_MAX_ENTRIES, CACHE_TTL_MS,
    MAX_RERANK_CANDIDATES, P95_LATENCY_THRESHOLD_MS,
};
pub use scoring::{
    apply_scoring, ScoreBreakdown, ScoreOptions, ScoredMemory, ScoringCandidate,
    CITATION_DECAY_RATE, CITATION_MAX_DAYS, COMPOSITE_WEIGHTS,
};
pub use vector::{VectorHit, VectorIndex, VectorIndexError};
