//! Memory record types
//!
//! A memory is a small annotated text artifact addressed by its natural key
//! `(spec_folder, file_path, anchor_id)`. Each record carries descriptive
//! metadata, an importance tier, FSRS scheduling state, and access telemetry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fsrs::{DEFAULT_DIFFICULTY, DEFAULT_STABILITY};

// ============================================================================
// IMPORTANCE TIERS
// ============================================================================

/// Importance tier with a fixed score multiplier.
///
/// The tier set is closed; unknown tier names parse as `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImportanceTier {
    /// Project-defining rules that should never decay out of view
    Constitutional,
    /// High-stakes knowledge (security, data loss)
    Critical,
    /// Worth resurfacing often
    Important,
    /// Default tier
    #[default]
    Normal,
    /// Scratch knowledge expected to expire
    Temporary,
    /// Known-stale; kept only for provenance
    Deprecated,
}

impl ImportanceTier {
    /// Fixed multiplier applied by the importance scoring factor.
    pub fn multiplier(&self) -> f64 {
        match self {
            ImportanceTier::Constitutional => 2.0,
            ImportanceTier::Critical => 1.5,
            ImportanceTier::Important => 1.3,
            ImportanceTier::Normal => 1.0,
            ImportanceTier::Temporary => 0.6,
            ImportanceTier::Deprecated => 0.1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportanceTier::Constitutional => "constitutional",
            ImportanceTier::Critical => "critical",
            ImportanceTier::Important => "important",
            ImportanceTier::Normal => "normal",
            ImportanceTier::Temporary => "temporary",
            ImportanceTier::Deprecated => "deprecated",
        }
    }

    /// Parse from a tier name. Unknown names fall back to `Normal`.
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "constitutional" => ImportanceTier::Constitutional,
            "critical" => ImportanceTier::Critical,
            "important" => ImportanceTier::Important,
            "normal" => ImportanceTier::Normal,
            "temporary" => ImportanceTier::Temporary,
            "deprecated" => ImportanceTier::Deprecated,
            _ => ImportanceTier::Normal,
        }
    }
}

impl std::fmt::Display for ImportanceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// EMBEDDING STATUS
// ============================================================================

/// Lifecycle state of a memory's embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    /// No vector yet (provider unavailable or deferred)
    #[default]
    Pending,
    /// Vector stored and indexed
    Success,
    /// Provider failed; lexical paths only
    Failed,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Pending => "pending",
            EmbeddingStatus::Success => "success",
            EmbeddingStatus::Failed => "failed",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "success" => EmbeddingStatus::Success,
            "failed" => EmbeddingStatus::Failed,
            _ => EmbeddingStatus::Pending,
        }
    }
}

// ============================================================================
// MEMORY RECORD
// ============================================================================

/// A stored memory with its full index state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    /// Stable integer id (SQLite rowid)
    pub id: i64,
    /// Filesystem scope grouping memories; used as a filter in all search paths
    pub spec_folder: String,
    /// Source file the memory was parsed from
    pub file_path: String,
    /// Named section within the file acting as a stable addressable unit
    pub anchor_id: String,
    pub title: String,
    /// Phrases that should surface this memory on exact match
    pub trigger_phrases: Vec<String>,
    pub summary: String,
    /// Canonical text all index views derive from
    pub content: String,
    /// Hash of the canonical content; also the dedup key when present
    pub content_hash: Option<String>,
    /// Coarse kind (decision, pattern, fix, note, ...) used by intent matching
    pub memory_type: String,
    pub importance_tier: ImportanceTier,
    /// Base importance in [0, 1]
    pub importance_weight: f64,

    // ========== FSRS state ==========
    /// Forgetting-curve time constant, clamped to [0.1, 365] days
    pub stability: f64,
    /// Inherent difficulty in [1, 10]
    pub difficulty: f64,
    pub last_review: Option<DateTime<Utc>>,
    pub review_count: i64,

    // ========== Access telemetry ==========
    pub access_count: i64,
    /// Epoch milliseconds
    pub last_accessed: Option<i64>,
    /// Epoch milliseconds; feeds the citation scoring factor
    pub last_cited: Option<i64>,

    pub embedding_status: EmbeddingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Memory {
    /// Days elapsed since the last review, or `None` when never reviewed.
    pub fn days_since_review(&self, now: DateTime<Utc>) -> Option<f64> {
        self.last_review
            .map(|lr| (now - lr).num_milliseconds() as f64 / 86_400_000.0)
    }
}

/// Input for creating a new memory.
///
/// Produced by the external Markdown parser; the engine never parses files
/// itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MemoryInput {
    pub spec_folder: String,
    pub file_path: String,
    pub anchor_id: String,
    pub title: String,
    #[serde(default)]
    pub trigger_phrases: Vec<String>,
    #[serde(default)]
    pub summary: String,
    pub content: String,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default = "default_memory_type")]
    pub memory_type: String,
    #[serde(default)]
    pub importance_tier: ImportanceTier,
    #[serde(default = "default_importance_weight")]
    pub importance_weight: f64,
}

fn default_memory_type() -> String {
    "note".to_string()
}

fn default_importance_weight() -> f64 {
    0.5
}

impl Default for MemoryInput {
    fn default() -> Self {
        Self {
            spec_folder: String::new(),
            file_path: String::new(),
            anchor_id: String::new(),
            title: String::new(),
            trigger_phrases: vec![],
            summary: String::new(),
            content: String::new(),
            content_hash: None,
            memory_type: default_memory_type(),
            importance_tier: ImportanceTier::Normal,
            importance_weight: default_importance_weight(),
        }
    }
}

impl MemoryInput {
    /// Initial FSRS state for a fresh memory.
    pub(crate) fn initial_fsrs(&self) -> (f64, f64) {
        (DEFAULT_STABILITY, DEFAULT_DIFFICULTY)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_multipliers_are_fixed() {
        assert_eq!(ImportanceTier::Constitutional.multiplier(), 2.0);
        assert_eq!(ImportanceTier::Critical.multiplier(), 1.5);
        assert_eq!(ImportanceTier::Important.multiplier(), 1.3);
        assert_eq!(ImportanceTier::Normal.multiplier(), 1.0);
        assert_eq!(ImportanceTier::Temporary.multiplier(), 0.6);
        assert_eq!(ImportanceTier::Deprecated.multiplier(), 0.1);
    }

    #[test]
    fn unknown_tier_parses_as_normal() {
        assert_eq!(ImportanceTier::parse_name("cosmic"), ImportanceTier::Normal);
        assert_eq!(ImportanceTier::parse_name(""), ImportanceTier::Normal);
    }

    #[test]
    fn tier_roundtrip() {
        for tier in [
            ImportanceTier::Constitutional,
            ImportanceTier::Critical,
            ImportanceTier::Important,
            ImportanceTier::Normal,
            ImportanceTier::Temporary,
            ImportanceTier::Deprecated,
        ] {
            assert_eq!(ImportanceTier::parse_name(tier.as_str()), tier);
        }
    }

    #[test]
    fn embedding_status_defaults_to_pending() {
        assert_eq!(EmbeddingStatus::parse_name("bogus"), EmbeddingStatus::Pending);
        assert_eq!(EmbeddingStatus::default(), EmbeddingStatus::Pending);
    }

    #[test]
    fn memory_input_deny_unknown_fields() {
        let json = r#"{"specFolder": "s", "filePath": "f.md", "anchorId": "a",
                       "title": "t", "content": "c"}"#;
        assert!(serde_json::from_str::<MemoryInput>(json).is_ok());

        let bad = r#"{"specFolder": "s", "filePath": "f.md", "anchorId": "a",
                      "title": "t", "content": "c", "injected": true}"#;
        assert!(serde_json::from_str::<MemoryInput>(bad).is_err());
    }
}
