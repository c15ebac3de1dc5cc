//! Prediction-error write gate
//!
//! Classifies every candidate write against its nearest existing memories:
//! near-duplicates reinforce instead of duplicating, close matches update,
//! contradicted close matches supersede, related content links, and novel
//! content creates. The decision, its side effects, and the conflict-log
//! append commit as one atomic unit.

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::{EngineError, Result};
use crate::memory::{Memory, MemoryInput};
use crate::storage::Store;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Similarity at or above which content is treated as a near-duplicate.
pub const DUPLICATE_THRESHOLD: f32 = 0.95;

/// Similarity at or above which content updates (or supersedes) the match.
pub const HIGH_MATCH_THRESHOLD: f32 = 0.90;

/// Similarity at or above which content is created linked to the match.
pub const MEDIUM_MATCH_THRESHOLD: f32 = 0.70;

/// Most related ids carried on a CREATE_LINKED decision.
pub const MAX_RELATED_IDS: usize = 3;

/// Conflict-log preview cap (chars) before ellipsis.
const PREVIEW_MAX_CHARS: usize = 200;

/// Contradiction pattern pairs, matched case-insensitively against both
/// texts. Negated forms are checked before their positive stems so "must
/// not" never counts as "must".
const CONTRADICTION_PAIRS: &[(&str, &str)] = &[
    ("always", "never"),
    ("must", "must not"),
    ("should", "should not"),
    ("do", "do not"),
    ("enable", "disable"),
    ("enabled", "disabled"),
    ("use", "avoid"),
    ("allow", "forbid"),
    ("required", "forbidden"),
    ("safe", "unsafe"),
];

// ============================================================================
// TYPES
// ============================================================================

/// A nearest-neighbor candidate fed to the gate.
#[derive(Debug, Clone)]
pub struct GateCandidate {
    pub id: i64,
    pub content: String,
    /// Similarity to the incoming content, in [0, 1].
    pub similarity: f32,
}

/// A detected contradiction between incoming and existing content.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contradiction {
    /// Term found in the existing memory.
    pub existing_term: String,
    /// Opposing term found in the new content.
    pub incoming_term: String,
}

/// Gate decision, one variant per write action.
#[derive(Debug, Clone)]
pub enum GateDecision {
    /// Novel content; no candidate above the medium threshold.
    Create { best_similarity: f32, reason: String },
    /// Near-duplicate of `candidate_id`; strengthen it instead of writing.
    Reinforce {
        candidate_id: i64,
        similarity: f32,
        reason: String,
    },
    /// Close match; refresh the existing memory's content.
    Update {
        candidate_id: i64,
        similarity: f32,
        reason: String,
    },
    /// Close match that contradicts the existing memory; replace it.
    Supersede {
        candidate_id: i64,
        similarity: f32,
        contradiction: Contradiction,
        reason: String,
    },
    /// Related content; create and remember up to three related ids.
    CreateLinked {
        related_ids: Vec<i64>,
        similarity: f32,
        reason: String,
    },
}

impl GateDecision {
    /// Action tag as logged in the conflict table.
    pub fn action(&self) -> &'static str {
        match self {
            GateDecision::Create { .. } => "CREATE",
            GateDecision::Reinforce { .. } => "REINFORCE",
            GateDecision::Update { .. } => "UPDATE",
            GateDecision::Supersede { .. } => "SUPERSEDE",
            GateDecision::CreateLinked { .. } => "CREATE_LINKED",
        }
    }

    /// Best candidate similarity the decision was based on.
    pub fn similarity(&self) -> f32 {
        match self {
            GateDecision::Create { best_similarity, .. } => *best_similarity,
            GateDecision::Reinforce { similarity, .. }
            | GateDecision::Update { similarity, .. }
            | GateDecision::Supersede { similarity, .. }
            | GateDecision::CreateLinked { similarity, .. } => *similarity,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            GateDecision::Create { reason, .. }
            | GateDecision::Reinforce { reason, .. }
            | GateDecision::Update { reason, .. }
            | GateDecision::Supersede { reason, .. }
            | GateDecision::CreateLinked { reason, .. } => reason,
        }
    }

    /// The matched candidate, when the decision references one.
    pub fn candidate_id(&self) -> Option<i64> {
        match self {
            GateDecision::Reinforce { candidate_id, .. }
            | GateDecision::Update { candidate_id, .. }
            | GateDecision::Supersede { candidate_id, .. } => Some(*candidate_id),
            _ => None,
        }
    }
}

/// Options for [`evaluate`].
#[derive(Debug, Clone)]
pub struct GateOptions {
    /// Skip contradiction detection entirely when false.
    pub check_contradictions: bool,
}

impl Default for GateOptions {
    fn default() -> Self {
        Self {
            check_contradictions: true,
        }
    }
}

// ============================================================================
// DECISION
// ============================================================================

/// Classify incoming content against its nearest neighbors.
///
/// Pure function of the inputs; all side effects live in
/// [`Store::gated_write`]. An empty candidate set yields CREATE.
pub fn evaluate(content: &str, candidates: &[GateCandidate], opts: &GateOptions) -> GateDecision {
    let best = candidates.iter().max_by(|a, b| {
        a.similarity
            .partial_cmp(&b.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.id.cmp(&a.id))
    });

    let Some(best) = best else {
        return GateDecision::Create {
            best_similarity: 0.0,
            reason: "no existing candidates".to_string(),
        };
    };

    let s = best.similarity;

    if s >= DUPLICATE_THRESHOLD {
        return GateDecision::Reinforce {
            candidate_id: best.id,
            similarity: s,
            reason: format!("near-duplicate of memory {} (similarity {s:.2})", best.id),
        };
    }

    if s >= HIGH_MATCH_THRESHOLD {
        if opts.check_contradictions {
            if let Some(contradiction) = detect_contradiction(&best.content, content) {
                return GateDecision::Supersede {
                    candidate_id: best.id,
                    similarity: s,
                    reason: format!(
                        "contradicts memory {}: '{}' vs '{}'",
                        best.id, contradiction.existing_term, contradiction.incoming_term
                    ),
                    contradiction,
                };
            }
        }
        return GateDecision::Update {
            candidate_id: best.id,
            similarity: s,
            reason: format!("refines memory {} (similarity {s:.2})", best.id),
        };
    }

    if s >= MEDIUM_MATCH_THRESHOLD {
        let mut related: Vec<(f32, i64)> = candidates
            .iter()
            .filter(|c| c.similarity >= MEDIUM_MATCH_THRESHOLD)
            .map(|c| (c.similarity, c.id))
            .collect();
        related.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        return GateDecision::CreateLinked {
            related_ids: related
                .into_iter()
                .take(MAX_RELATED_IDS)
                .map(|(_, id)| id)
                .collect(),
            similarity: s,
            reason: format!("related to existing memories (best similarity {s:.2})"),
        };
    }

    GateDecision::Create {
        best_similarity: s,
        reason: format!("novel content (best similarity {s:.2})"),
    }
}

/// Detect opposing guidance between an existing memory and new content.
///
/// Case-insensitive pattern matching over word phrases; negated phrases are
/// claimed before their stems so text containing "must not" never also
/// matches "must".
pub fn detect_contradiction(existing: &str, incoming: &str) -> Option<Contradiction> {
    let existing_lower = existing.to_lowercase();
    let incoming_lower = incoming.to_lowercase();

    for (a, b) in CONTRADICTION_PAIRS {
        if has_phrase(&existing_lower, a) && has_phrase(&incoming_lower, b) {
            return Some(Contradiction {
                existing_term: a.to_string(),
                incoming_term: b.to_string(),
            });
        }
        if has_phrase(&existing_lower, b) && has_phrase(&incoming_lower, a) {
            return Some(Contradiction {
                existing_term: b.to_string(),
                incoming_term: a.to_string(),
            });
        }
    }
    None
}

/// Word-boundary phrase containment. A phrase that is a prefix of a negated
/// form present in the text ("must" inside "must not") does not count.
fn has_phrase(text: &str, phrase: &str) -> bool {
    let tokens: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|t| !t.is_empty())
        .collect();
    let needle: Vec<&str> = phrase.split_whitespace().collect();
    if needle.is_empty() || tokens.len() < needle.len() {
        return false;
    }

    'outer: for start in 0..=(tokens.len() - needle.len()) {
        for (offset, want) in needle.iter().enumerate() {
            let token = tokens[start + offset];
            let matched = if *want == "not" {
                token == "not" || token == "don't" || token == "never"
            } else {
                token == *want
            };
            if !matched {
                continue 'outer;
            }
        }
        // Single positive word immediately followed by a negation belongs to
        // the negated phrase, not this one.
        if needle.len() == 1 {
            if let Some(next) = tokens.get(start + 1) {
                if *next == "not" || *next == "never" {
                    continue 'outer;
                }
            }
        }
        return true;
    }
    false
}

// ============================================================================
// GATED WRITE
// ============================================================================

/// Result of a gated write.
#[derive(Debug)]
pub struct GatedWriteResult {
    pub decision: GateDecision,
    /// The affected memory: created, updated, or reinforced.
    pub memory: Option<Memory>,
    /// Correction id when a supersede was recorded.
    pub correction_id: Option<i64>,
    /// Conflict-log row id, when the decision was worth logging.
    pub conflict_id: Option<i64>,
}

impl Store {
    /// Nearest neighbors of `content` for gate evaluation: vector search
    /// when an embedding is available, lexical otherwise.
    pub fn gate_candidates(
        &self,
        content: &str,
        spec_folder: Option<&str>,
        k: usize,
    ) -> Result<Vec<GateCandidate>> {
        if let Some(query_vec) = self.embed_query(content) {
            let hits = self.vector_search(&query_vec, k, spec_folder)?;
            let mut candidates = Vec::with_capacity(hits.len());
            for hit in hits {
                if let Some(memory) = self.get_memory(hit.id)? {
                    candidates.push(GateCandidate {
                        id: hit.id,
                        content: memory.content,
                        similarity: hit.similarity,
                    });
                }
            }
            return Ok(candidates);
        }

        // Lexical fallback: normalized combined scores stand in for
        // similarity, scaled into the linking band so duplicates are still
        // caught by content-hash equality below.
        let hits = self.combined_lexical_search(content, k, spec_folder)?;
        let mut candidates = Vec::with_capacity(hits.len());
        for hit in hits {
            if let Some(memory) = self.get_memory(hit.id)? {
                let similarity = if memory.content == content {
                    1.0
                } else {
                    hit.combined_score.unwrap_or(0.5) as f32 * 0.69
                };
                candidates.push(GateCandidate {
                    id: hit.id,
                    content: memory.content,
                    similarity,
                });
            }
        }
        Ok(candidates)
    }

    /// Classify and apply a write through the prediction-error gate.
    ///
    /// Decision, side effects, and the conflict-log append are one atomic
    /// unit per the write-path ordering guarantee.
    pub fn gated_write(&self, input: &MemoryInput, opts: &GateOptions) -> Result<GatedWriteResult> {
        if input.content.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "memory content cannot be empty".to_string(),
            ));
        }

        let candidates =
            self.gate_candidates(&input.content, Some(input.spec_folder.as_str()), 10)?;
        let decision = evaluate(&input.content, &candidates, opts);

        let content_hash = input
            .content_hash
            .clone()
            .unwrap_or_else(|| content_digest(&input.content));
        let preview = preview(&input.content);

        // Embedding happens outside the write transaction (suspension point).
        let (embedding, status) = match self.embeddings().embed(&input.content) {
            Ok(vector) => (Some(vector), crate::memory::EmbeddingStatus::Success),
            Err(crate::embeddings::EmbeddingError::Unavailable(_)) => {
                (None, crate::memory::EmbeddingStatus::Pending)
            }
            Err(_) => (None, crate::memory::EmbeddingStatus::Failed),
        };

        let mut created_content: Option<(i64, String, String, Option<Vec<f32>>)> = None;
        let mut drop_vector_for: Option<i64> = None;
        let result = {
            let mut writer = self.writer()?;
            let tx = writer.transaction()?;

            let (memory, correction_id, conflict_id) = match &decision {
                GateDecision::Reinforce { candidate_id, similarity, reason } => {
                    let memory = Self::strengthen_in(&tx, *candidate_id, Utc::now())?;
                    let conflict_id = Self::log_conflict_in(
                        &tx,
                        &content_hash,
                        Some(*candidate_id),
                        *similarity as f64,
                        decision.action(),
                        Some(&format!("{reason}; preview: {preview}")),
                    )?;
                    (Some(memory), None, Some(conflict_id))
                }
                GateDecision::Update { candidate_id, similarity, reason } => {
                    let now = Utc::now();
                    tx.execute(
                        "UPDATE memories SET content = ?1, content_hash = ?2, updated_at = ?3,
                             embedding_status = ?4 WHERE id = ?5",
                        rusqlite::params![
                            input.content,
                            content_hash,
                            now,
                            status.as_str(),
                            candidate_id
                        ],
                    )?;
                    match &embedding {
                        Some(vector) => {
                            let blob = crate::embeddings::Embedding {
                                vector: vector.clone(),
                                dimensions: vector.len(),
                                model: "external".to_string(),
                            };
                            tx.execute(
                                "INSERT INTO memory_embeddings (memory_id, embedding, dimensions, model, created_at)
                                 VALUES (?1, ?2, ?3, ?4, ?5)
                                 ON CONFLICT(memory_id) DO UPDATE SET
                                     embedding = excluded.embedding,
                                     dimensions = excluded.dimensions,
                                     created_at = excluded.created_at",
                                rusqlite::params![candidate_id, blob.to_bytes(), vector.len() as i64, blob.model, now],
                            )?;
                        }
                        None => {
                            // Keep every index view derived from the same
                            // committed text: no fresh vector means no vector.
                            tx.execute(
                                "DELETE FROM memory_embeddings WHERE memory_id = ?1",
                                rusqlite::params![candidate_id],
                            )?;
                            drop_vector_for = Some(*candidate_id);
                        }
                    }
                    let conflict_id = Self::log_conflict_in(
                        &tx,
                        &content_hash,
                        Some(*candidate_id),
                        *similarity as f64,
                        decision.action(),
                        Some(&format!("{reason}; preview: {preview}")),
                    )?;
                    let memory = Self::memory_in(&tx, *candidate_id)?;
                    if let Some(m) = &memory {
                        created_content = Some((
                            m.id,
                            input.content.clone(),
                            m.spec_folder.clone(),
                            embedding.clone(),
                        ));
                    }
                    (memory, None, Some(conflict_id))
                }
                GateDecision::Supersede { candidate_id, similarity, reason, .. } => {
                    let new_id =
                        Self::insert_memory_in(&tx, input, embedding.as_deref(), status)?;
                    let correction_id = if self.config().relations_enabled {
                        Some(Self::record_correction_in(
                            &tx,
                            *candidate_id,
                            Some(new_id),
                            crate::corrections::CorrectionType::Superseded,
                            reason,
                            "gate",
                        )?)
                    } else {
                        // Relations disabled: apply the stability penalty and
                        // boost directly so superseded knowledge still decays.
                        Self::apply_supersede_stability_in(&tx, *candidate_id, new_id)?;
                        None
                    };
                    let conflict_id = Self::log_conflict_in(
                        &tx,
                        &content_hash,
                        Some(*candidate_id),
                        *similarity as f64,
                        decision.action(),
                        Some(&format!("{reason}; preview: {preview}")),
                    )?;
                    let memory = Self::memory_in(&tx, new_id)?;
                    created_content = Some((
                        new_id,
                        input.content.clone(),
                        input.spec_folder.clone(),
                        embedding.clone(),
                    ));
                    (memory, correction_id, Some(conflict_id))
                }
                GateDecision::CreateLinked { related_ids, similarity, reason } => {
                    let new_id =
                        Self::insert_memory_in(&tx, input, embedding.as_deref(), status)?;
                    if self.config().relations_enabled {
                        let now = Utc::now();
                        for related in related_ids {
                            tx.execute(
                                "INSERT INTO memory_edges (source_id, target_id, edge_type, created_at)
                                 VALUES (?1, ?2, 'related', ?3)",
                                rusqlite::params![new_id, related, now],
                            )?;
                        }
                    }
                    let conflict_id = Self::log_conflict_in(
                        &tx,
                        &content_hash,
                        related_ids.first().copied(),
                        *similarity as f64,
                        decision.action(),
                        Some(&format!("{reason}; preview: {preview}")),
                    )?;
                    let memory = Self::memory_in(&tx, new_id)?;
                    created_content = Some((
                        new_id,
                        input.content.clone(),
                        input.spec_folder.clone(),
                        embedding.clone(),
                    ));
                    (memory, None, Some(conflict_id))
                }
                GateDecision::Create { best_similarity, reason } => {
                    let new_id =
                        Self::insert_memory_in(&tx, input, embedding.as_deref(), status)?;
                    // A zero-similarity create is routine; only log when the
                    // gate actually saw a neighbor.
                    let conflict_id = if *best_similarity > 0.0 {
                        Some(Self::log_conflict_in(
                            &tx,
                            &content_hash,
                            None,
                            *best_similarity as f64,
                            decision.action(),
                            Some(&format!("{reason}; preview: {preview}")),
                        )?)
                    } else {
                        None
                    };
                    let memory = Self::memory_in(&tx, new_id)?;
                    created_content = Some((
                        new_id,
                        input.content.clone(),
                        input.spec_folder.clone(),
                        embedding.clone(),
                    ));
                    (memory, None, conflict_id)
                }
            };

            tx.commit()?;
            GatedWriteResult {
                decision,
                memory,
                correction_id,
                conflict_id,
            }
        };

        if let Some(id) = drop_vector_for {
            self.drop_vector(id);
        }
        if let Some((id, content, folder, vector)) = created_content {
            self.index_memory(id, &content, &folder, vector);
        }

        Ok(result)
    }

    /// Supersede stability coupling without a ledger row (relations off).
    fn apply_supersede_stability_in(
        tx: &rusqlite::Connection,
        original_id: i64,
        replacement_id: i64,
    ) -> Result<()> {
        tx.execute(
            "UPDATE memories SET stability = MAX(0.1, stability * 0.5) WHERE id = ?1",
            rusqlite::params![original_id],
        )?;
        tx.execute(
            "UPDATE memories SET stability = MIN(365.0, stability * 1.2) WHERE id = ?1",
            rusqlite::params![replacement_id],
        )?;
        Ok(())
    }
}

/// Truncated conflict-log preview, at most 200 chars plus ellipsis.
fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

fn content_digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ============================================================================
// TESTS
// ============================================================================
