//! Composite relevance scorer
//!
//! Five-factor ranking applied after fusion: temporal (FSRS retrievability),
//! usage, importance, pattern, citation. Weights are fixed and sum to 1.0;
//! every factor lands in [0, 1], so composite scores do too.
//!
//! A legacy six-factor mode (adds a recency factor) survives behind an
//! opt-in flag for callers that still depend on the old ordering; new paths
//! never set it.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::fsrs::retrievability;
use crate::memory::Memory;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Factor weights: temporal, usage, importance, pattern, citation.
pub const COMPOSITE_WEIGHTS: [f64; 5] = [0.25, 0.15, 0.25, 0.20, 0.15];

/// Inverse-linear decay rate for the citation factor (per day).
pub const CITATION_DECAY_RATE: f64 = 0.1;

/// Citations older than this score zero.
pub const CITATION_MAX_DAYS: f64 = 365.0;

/// Similarity (percent) at or above which the pattern factor takes the
/// semantic bonus.
pub const SEMANTIC_BONUS_THRESHOLD: f64 = 95.0;

// Legacy mode: weights for temporal, usage, importance, pattern, citation,
// recency.
const LEGACY_WEIGHTS: [f64; 6] = [0.20, 0.15, 0.20, 0.15, 0.15, 0.15];

// ============================================================================
// TYPES
// ============================================================================

/// Per-factor breakdown attached to each scored result.
#[derive(Debug, Clone, Copy, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub temporal: f64,
    pub usage: f64,
    pub importance: f64,
    pub pattern: f64,
    pub citation: f64,
    /// Only populated in legacy six-factor mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recency: Option<f64>,
}

/// A candidate entering the scoring stage.
#[derive(Debug, Clone)]
pub struct ScoringCandidate {
    pub memory: Memory,
    /// Best retrieval similarity as a percentage [0, 100].
    pub similarity_pct: f64,
}

/// A scored, sortable result.
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub similarity_pct: f64,
    pub composite_score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Options for [`apply_scoring`].
#[derive(Debug, Clone)]
pub struct ScoreOptions {
    /// Query text for title/anchor/keyword matching.
    pub query: String,
    /// Evaluation timestamp; injectable for tests.
    pub now: DateTime<Utc>,
    /// Opt-in legacy six-factor mode.
    pub legacy_six_factor: bool,
}

impl ScoreOptions {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            now: Utc::now(),
            legacy_six_factor: false,
        }
    }
}

// ============================================================================
// FACTORS
// ============================================================================

/// FSRS retrievability at `now`; 0.5 when the memory was never reviewed.
pub fn temporal_factor(memory: &Memory, now: DateTime<Utc>) -> f64 {
    match memory.days_since_review(now) {
        Some(days) => retrievability(memory.stability, days).clamp(0.0, 1.0),
        None => 0.5,
    }
}

/// Linear usage ramp: 0 at zero accesses, saturating at 1.0 from ten up.
pub fn usage_factor(access_count: i64) -> f64 {
    let count = access_count.max(0) as f64;
    ((1.0 + 0.05 * count - 1.0) / 0.5).clamp(0.0, 1.0)
}

/// Tier-weighted importance. A falsy base weight defaults to 0.5.
pub fn importance_factor(memory: &Memory) -> f64 {
    let base = if memory.importance_weight > 0.0 && memory.importance_weight.is_finite() {
        memory.importance_weight
    } else {
        0.5
    };
    (base * memory.importance_tier.multiplier() / 2.0).clamp(0.0, 1.0)
}

/// Similarity-anchored pattern match with small structural bonuses.
pub fn pattern_factor(memory: &Memory, similarity_pct: f64, query: &str) -> f64 {
    let mut score = 0.5 * similarity_pct.clamp(0.0, 100.0) / 100.0;

    let query_lower = query.to_lowercase();
    let title_lower = memory.title.to_lowercase();

    if !title_lower.is_empty() {
        if query_lower == title_lower {
            score += 0.2;
        } else if query_lower.contains(&title_lower) || title_lower.contains(&query_lower) {
            score += 0.1;
        }
    }

    if !memory.anchor_id.is_empty()
        && query_lower
            .split_whitespace()
            .any(|t| memory.anchor_id.to_lowercase().contains(t))
    {
        score += 0.05;
    }

    if intent_keywords(&memory.memory_type)
        .iter()
        .any(|kw| query_lower.contains(kw))
    {
        score += 0.1;
    }

    if similarity_pct >= SEMANTIC_BONUS_THRESHOLD {
        score += 0.05;
    }

    score.clamp(0.0, 1.0)
}

/// Inverse-linear citation recency; falls back through last_accessed and
/// updated_at, 0.5 with no timestamp at all.
pub fn citation_factor(memory: &Memory, now: DateTime<Utc>) -> f64 {
    let cited_ms = memory
        .last_cited
        .or(memory.last_accessed)
        .unwrap_or_else(|| memory.updated_at.timestamp_millis());

    if cited_ms <= 0 {
        return 0.5;
    }

    let days = (now.timestamp_millis() - cited_ms).max(0) as f64 / 86_400_000.0;
    if days >= CITATION_MAX_DAYS {
        return 0.0;
    }
    (1.0 / (1.0 + CITATION_DECAY_RATE * days)).clamp(0.0, 1.0)
}

/// Query keywords that signal intent toward a given memory type.
fn intent_keywords(memory_type: &str) -> &'static [&'static str] {
    match memory_type {
        "decision" => &["why", "decide", "decision", "chose", "tradeoff"],
        "pattern" => &["how", "implement", "pattern", "example"],
        "fix" => &["bug", "error", "fix", "broken", "fails"],
        "constraint" => &["must", "require", "constraint", "rule"],
        "preference" => &["prefer", "style", "convention"],
        _ => &[],
    }
}

// ============================================================================
// SCORING
// ============================================================================

/// Attach composite scores and sort best-first.
pub fn apply_scoring(candidates: Vec<ScoringCandidate>, opts: &ScoreOptions) -> Vec<ScoredMemory> {
    let mut scored: Vec<ScoredMemory> = candidates
        .into_iter()
        .map(|c| score_one(c, opts))
        .collect();

    scored.sort_by(|a, b| {
        b.composite_score
            .partial_cmp(&a.composite_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.memory.id.cmp(&b.memory.id))
    });
    scored
}

fn score_one(candidate: ScoringCandidate, opts: &ScoreOptions) -> ScoredMemory {
    let m = &candidate.memory;
    let mut breakdown = ScoreBreakdown {
        temporal: temporal_factor(m, opts.now),
        usage: usage_factor(m.access_count),
        importance: importance_factor(m),
        pattern: pattern_factor(m, candidate.similarity_pct, &opts.query),
        citation: citation_factor(m, opts.now),
        recency: None,
    };

    let composite = if opts.legacy_six_factor {
        let days_old = (opts.now - m.updated_at).num_days().max(0) as f64;
        let recency = (-days_old / 30.0).exp();
        breakdown.recency = Some(recency);
        LEGACY_WEIGHTS[0] * breakdown.temporal
            + LEGACY_WEIGHTS[1] * breakdown.usage
            + LEGACY_WEIGHTS[2] * breakdown.importance
            + LEGACY_WEIGHTS[3] * breakdown.pattern
            + LEGACY_WEIGHTS[4] * breakdown.citation
            + LEGACY_WEIGHTS[5] * recency
    } else {
        COMPOSITE_WEIGHTS[0] * breakdown.temporal
            + COMPOSITE_WEIGHTS[1] * breakdown.usage
            + COMPOSITE_WEIGHTS[2] * breakdown.importance
            + COMPOSITE_WEIGHTS[3] * breakdown.pattern
            + COMPOSITE_WEIGHTS[4] * breakdown.citation
    };

    ScoredMemory {
        memory: candidate.memory,
        similarity_pct: candidate.similarity_pct,
        composite_score: composite.clamp(0.0, 1.0),
        breakdown,
    }
}

// ============================================================================
// TESTS
// ============================================================================
