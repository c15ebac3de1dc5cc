//! # Engram Core
//!
//! Cognitive memory engine for AI coding assistants: a local, durable store
//! of annotated text artifacts that decides, on every write, whether
//! incoming content is new, reinforcing, refining, or contradicting what is
//! already known, and on every read returns the items most worth
//! re-surfacing under a bounded token budget while strengthening them as a
//! side effect of retrieval.
//!
//! The moving parts:
//!
//! - **FSRS scheduling**: power-law retrievability, stability/difficulty
//!   updates, testing-effect strengthening on access
//! - **Hybrid retrieval**: vector + lexical (BM25/FTS5) fused with RRF,
//!   ranked by a five-factor composite, optionally reranked by a
//!   cross-encoder with a per-session latency circuit breaker
//! - **Prediction-error write gate**: CREATE / REINFORCE / UPDATE /
//!   SUPERSEDE / CREATE_LINKED, with contradiction detection
//! - **Corrections ledger**: reversible supersede/deprecate/refine/merge
//!   with stability coupling
//! - **Session layer**: per-session dedup plus crash-recoverable
//!   checkpoints (`CONTINUE_SESSION.md`)
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use engram_core::{ContextMode, ContextOptions, ContextOrchestrator,
//!                   EngineConfig, EmbeddingService, MemoryInput, Store};
//! use std::sync::Arc;
//!
//! let store = Arc::new(Store::open(None, EngineConfig::from_env(),
//!                                  EmbeddingService::disabled())?);
//! store.reset_interrupted()?;
//!
//! let result = store.gated_write(&MemoryInput {
//!     content: "Always validate user input at the boundary".into(),
//!     ..Default::default()
//! }, &Default::default())?;
//!
//! let orchestrator = ContextOrchestrator::new(store);
//! let envelope = orchestrator
//!     .get_context("fix the input validation bug", ContextMode::Auto,
//!                  &ContextOptions::default())
//!     .await;
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod context;
pub mod corrections;
pub mod embeddings;
pub mod error;
pub mod fsrs;
pub mod gate;
pub mod memory;
pub mod search;
pub mod session;
pub mod storage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use config::EngineConfig;
pub use context::{
    ContextMode, ContextOptions, ContextOrchestrator, Envelope, EnvelopeMeta, Intent, Recovery,
};
pub use corrections::{
    CorrectionChain, CorrectionOutcome, CorrectionRecord, CorrectionType, CorrectionsStats,
    CORRECTION_STABILITY_PENALTY, REPLACEMENT_STABILITY_BOOST,
};
pub use embeddings::{
    cosine_similarity, Embedding, EmbeddingError, EmbeddingProvider, EmbeddingService,
};
pub use error::{EngineError, Result};
pub use fsrs::{
    access_stability, optimal_interval, retrievability, update_difficulty, update_stability,
    Grade, DEFAULT_DIFFICULTY, DEFAULT_STABILITY, FSRS_DECAY, FSRS_FACTOR, MAX_STABILITY,
    MIN_STABILITY,
};
pub use gate::{
    detect_contradiction, evaluate, Contradiction, GateCandidate, GateDecision, GateOptions,
    GatedWriteResult, DUPLICATE_THRESHOLD, HIGH_MATCH_THRESHOLD, MEDIUM_MATCH_THRESHOLD,
};
pub use memory::{EmbeddingStatus, ImportanceTier, Memory, MemoryInput};
pub use search::{
    apply_scoring, combine_lexical, escape_fts_query, expand_query, levenshtein,
    reciprocal_rank_fusion, Bm25Index, CrossEncoderReranker, ExpandOptions, FusedHit, LexicalHit,
    LexicalSource, QueryExpansion, RerankCandidate, RerankOptions, RerankOutcome, RerankProvider,
    ScoreOptions, ScoredMemory, ScoringCandidate, SearchSource, VectorHit, VectorIndex,
    COMPOSITE_WEIGHTS, MAX_RERANK_CANDIDATES, RRF_K,
};
pub use session::{
    memory_hash, new_session_id, DedupStats, FilterOutcome, SessionSave, SessionState,
    SessionStatus,
};
pub use storage::{ConflictRecord, EngineStats, RetrievalHit, Store, UnifiedSearchOptions};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        ContextMode, ContextOptions, ContextOrchestrator, EngineConfig, EngineError, Envelope,
        GateDecision, GateOptions, Grade, ImportanceTier, Memory, MemoryInput, Result,
        SessionSave, SessionStatus, Store, UnifiedSearchOptions,
    };
}
