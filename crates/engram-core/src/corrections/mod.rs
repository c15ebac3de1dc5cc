//! Corrections ledger
//!
//! Reversible record of supersede/deprecate/refine/merge operations. A
//! correction halves the original memory's stability and, when a
//! replacement exists, boosts its stability by 20%; the full before/after
//! snapshot makes every correction undoable exactly once.
//!
//! All operations are gated by `ENABLE_RELATIONS`; disabled, they return
//! [`CorrectionOutcome::Skipped`] without side effects.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{EngineError, Result};
use crate::fsrs::{MAX_STABILITY, MIN_STABILITY};
use crate::storage::Store;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Multiplier applied to the corrected memory's stability.
pub const CORRECTION_STABILITY_PENALTY: f64 = 0.5;

/// Multiplier applied to the replacement memory's stability.
pub const REPLACEMENT_STABILITY_BOOST: f64 = 1.2;

// ============================================================================
// TYPES
// ============================================================================

/// Closed set of correction kinds; unknown values are rejected by a CHECK
/// constraint at the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionType {
    Superseded,
    Deprecated,
    Refined,
    Merged,
}

impl CorrectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionType::Superseded => "superseded",
            CorrectionType::Deprecated => "deprecated",
            CorrectionType::Refined => "refined",
            CorrectionType::Merged => "merged",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "superseded" => Some(CorrectionType::Superseded),
            "deprecated" => Some(CorrectionType::Deprecated),
            "refined" => Some(CorrectionType::Refined),
            "merged" => Some(CorrectionType::Merged),
            _ => None,
        }
    }

    /// Causal edge label emitted into `memory_edges`.
    fn edge_type(&self) -> &'static str {
        match self {
            CorrectionType::Superseded => "supersedes",
            CorrectionType::Deprecated => "deprecates",
            CorrectionType::Refined => "derived_from",
            CorrectionType::Merged => "merged_into",
        }
    }
}

/// A row from the corrections ledger.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionRecord {
    pub id: i64,
    pub original_memory_id: i64,
    pub replacement_memory_id: Option<i64>,
    pub correction_type: CorrectionType,
    pub original_stability_before: f64,
    pub original_stability_after: f64,
    pub correction_stability_before: Option<f64>,
    pub correction_stability_after: Option<f64>,
    pub reason: String,
    pub actor: String,
    pub created_at: DateTime<Utc>,
    pub is_undone: bool,
    pub undone_at: Option<DateTime<Utc>>,
}

/// Outcome of a gated ledger operation.
#[derive(Debug, Clone)]
pub enum CorrectionOutcome {
    Applied(CorrectionRecord),
    /// Relations disabled; nothing happened.
    Skipped,
}

impl CorrectionOutcome {
    pub fn record(&self) -> Option<&CorrectionRecord> {
        match self {
            CorrectionOutcome::Applied(record) => Some(record),
            CorrectionOutcome::Skipped => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, CorrectionOutcome::Skipped)
    }
}

/// A memory's outgoing correction chain.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionChain {
    pub corrections: Vec<CorrectionRecord>,
    pub total: usize,
}

/// Ledger counters.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionsStats {
    pub by_type: HashMap<String, i64>,
    pub active: i64,
    pub undone: i64,
}

// ============================================================================
// LEDGER OPERATIONS
// ============================================================================

impl Store {
    /// Record a correction: penalize the original, boost the replacement,
    /// snapshot both, and emit the causal edge. One transaction.
    ///
    /// Self-corrections and unknown originals are rejected before any write.
    pub fn record_correction(
        &self,
        original_id: i64,
        replacement_id: Option<i64>,
        correction_type: CorrectionType,
        reason: &str,
        actor: &str,
    ) -> Result<CorrectionOutcome> {
        if !self.config().relations_enabled {
            return Ok(CorrectionOutcome::Skipped);
        }

        let correction_id = {
            let mut writer = self.writer()?;
            let tx = writer.transaction()?;
            let id = Self::record_correction_in(
                &tx,
                original_id,
                replacement_id,
                correction_type,
                reason,
                actor,
            )?;
            tx.commit()?;
            id
        };

        let record = self
            .get_correction(correction_id)?
            .ok_or_else(|| EngineError::NotFound(format!("correction {correction_id}")))?;
        Ok(CorrectionOutcome::Applied(record))
    }

    /// Ledger write within an existing transaction (used by the gate's
    /// supersede path so decision + ledger + conflict commit together).
    pub(crate) fn record_correction_in(
        conn: &Connection,
        original_id: i64,
        replacement_id: Option<i64>,
        correction_type: CorrectionType,
        reason: &str,
        actor: &str,
    ) -> Result<i64> {
        if replacement_id == Some(original_id) {
            return Err(EngineError::InvalidInput(
                "a memory cannot correct itself".to_string(),
            ));
        }

        let original = Self::memory_in(conn, original_id)?
            .ok_or_else(|| EngineError::NotFound(format!("memory {original_id}")))?;

        let replacement = match replacement_id {
            Some(id) => Some(
                Self::memory_in(conn, id)?
                    .ok_or_else(|| EngineError::NotFound(format!("memory {id}")))?,
            ),
            None => None,
        };

        let original_after = (original.stability * CORRECTION_STABILITY_PENALTY)
            .clamp(MIN_STABILITY, MAX_STABILITY);
        conn.execute(
            "UPDATE memories SET stability = ?1, updated_at = ?2 WHERE id = ?3",
            params![original_after, Utc::now(), original_id],
        )?;

        let (replacement_before, replacement_after) = match &replacement {
            Some(r) => {
                let after = (r.stability * REPLACEMENT_STABILITY_BOOST)
                    .clamp(MIN_STABILITY, MAX_STABILITY);
                conn.execute(
                    "UPDATE memories SET stability = ?1, updated_at = ?2 WHERE id = ?3",
                    params![after, Utc::now(), r.id],
                )?;
                (Some(r.stability), Some(after))
            }
            None => (None, None),
        };

        let now = Utc::now();
        conn.execute(
            "INSERT INTO corrections (
                original_memory_id, replacement_memory_id, correction_type,
                original_stability_before, original_stability_after,
                correction_stability_before, correction_stability_after,
                reason, actor, created_at, is_undone
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0)",
            params![
                original_id,
                replacement_id,
                correction_type.as_str(),
                original.stability,
                original_after,
                replacement_before,
                replacement_after,
                reason,
                actor,
                now,
            ],
        )?;
        let correction_id = conn.last_insert_rowid();

        if let Some(replacement_id) = replacement_id {
            conn.execute(
                "INSERT INTO memory_edges (source_id, target_id, edge_type, correction_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    replacement_id,
                    original_id,
                    correction_type.edge_type(),
                    correction_id,
                    now,
                ],
            )?;
        }

        tracing::info!(
            correction_id,
            original_id,
            ?replacement_id,
            kind = correction_type.as_str(),
            "correction recorded"
        );
        Ok(correction_id)
    }

    /// Deprecate without a replacement.
    pub fn deprecate(&self, id: i64, reason: &str) -> Result<CorrectionOutcome> {
        self.record_correction(id, None, CorrectionType::Deprecated, reason, "api")
    }

    /// Mark `id` as refined into `replacement_id`.
    pub fn refine(&self, id: i64, replacement_id: i64, reason: &str) -> Result<CorrectionOutcome> {
        self.record_correction(id, Some(replacement_id), CorrectionType::Refined, reason, "api")
    }

    /// Mark `id` as merged into `replacement_id`.
    pub fn merge(&self, id: i64, replacement_id: i64, reason: &str) -> Result<CorrectionOutcome> {
        self.record_correction(id, Some(replacement_id), CorrectionType::Merged, reason, "api")
    }

    /// Mark `id` as superseded by `replacement_id`.
    pub fn supersede(
        &self,
        id: i64,
        replacement_id: i64,
        reason: &str,
    ) -> Result<CorrectionOutcome> {
        self.record_correction(id, Some(replacement_id), CorrectionType::Superseded, reason, "api")
    }

    /// Undo a correction: restore both stabilities from the snapshot,
    /// remove its causal edges, and mark it undone. Refuses a second undo.
    pub fn undo_correction(&self, correction_id: i64) -> Result<CorrectionOutcome> {
        if !self.config().relations_enabled {
            return Ok(CorrectionOutcome::Skipped);
        }

        let record = self
            .get_correction(correction_id)?
            .ok_or_else(|| EngineError::NotFound(format!("correction {correction_id}")))?;
        if record.is_undone {
            return Err(EngineError::InvalidInput(format!(
                "correction {correction_id} is already undone"
            )));
        }

        {
            let mut writer = self.writer()?;
            let tx = writer.transaction()?;
            let now = Utc::now();

            tx.execute(
                "UPDATE memories SET stability = ?1, updated_at = ?2 WHERE id = ?3",
                params![record.original_stability_before, now, record.original_memory_id],
            )?;
            if let (Some(replacement_id), Some(before)) = (
                record.replacement_memory_id,
                record.correction_stability_before,
            ) {
                tx.execute(
                    "UPDATE memories SET stability = ?1, updated_at = ?2 WHERE id = ?3",
                    params![before, now, replacement_id],
                )?;
            }

            tx.execute(
                "DELETE FROM memory_edges WHERE correction_id = ?1",
                params![correction_id],
            )?;
            tx.execute(
                "UPDATE corrections SET is_undone = 1, undone_at = ?1 WHERE id = ?2",
                params![now, correction_id],
            )?;
            tx.commit()?;
        }

        let record = self
            .get_correction(correction_id)?
            .ok_or_else(|| EngineError::NotFound(format!("correction {correction_id}")))?;
        Ok(CorrectionOutcome::Applied(record))
    }

    pub fn get_correction(&self, id: i64) -> Result<Option<CorrectionRecord>> {
        let reader = self.reader()?;
        reader
            .query_row(
                "SELECT id, original_memory_id, replacement_memory_id, correction_type,
                        original_stability_before, original_stability_after,
                        correction_stability_before, correction_stability_after,
                        reason, actor, created_at, is_undone, undone_at
                 FROM corrections WHERE id = ?1",
                params![id],
                row_to_correction,
            )
            .optional()
            .map_err(EngineError::from)
    }

    /// Walk outgoing correction edges from a memory.
    pub fn correction_chain(&self, memory_id: i64) -> Result<CorrectionChain> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, original_memory_id, replacement_memory_id, correction_type,
                    original_stability_before, original_stability_after,
                    correction_stability_before, correction_stability_after,
                    reason, actor, created_at, is_undone, undone_at
             FROM corrections WHERE original_memory_id = ?1
             ORDER BY created_at ASC, id ASC",
        )?;
        let corrections = stmt
            .query_map(params![memory_id], row_to_correction)?
            .collect::<rusqlite::Result<Vec<CorrectionRecord>>>()?;
        let total = corrections.len();
        Ok(CorrectionChain { corrections, total })
    }

    /// Ledger counters by type and undo state.
    pub fn corrections_stats(&self) -> Result<CorrectionsStats> {
        let reader = self.reader()?;
        let mut by_type = HashMap::new();
        let mut stmt =
            reader.prepare("SELECT correction_type, COUNT(*) FROM corrections GROUP BY 1")?;
        for row in stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))? {
            let (kind, count) = row?;
            by_type.insert(kind, count);
        }
        drop(stmt);

        let active: i64 = reader.query_row(
            "SELECT COUNT(*) FROM corrections WHERE is_undone = 0",
            [],
            |r| r.get(0),
        )?;
        let undone: i64 = reader.query_row(
            "SELECT COUNT(*) FROM corrections WHERE is_undone = 1",
            [],
            |r| r.get(0),
        )?;

        Ok(CorrectionsStats {
            by_type,
            active,
            undone,
        })
    }
}

fn row_to_correction(row: &rusqlite::Row<'_>) -> rusqlite::Result<CorrectionRecord> {
    let kind: String = row.get(3)?;
    Ok(CorrectionRecord {
        id: row.get(0)?,
        original_memory_id: row.get(1)?,
        replacement_memory_id: row.get(2)?,
        correction_type: CorrectionType::parse_name(&kind)
            .unwrap_or(CorrectionType::Superseded),
        original_stability_before: row.get(4)?,
        original_stability_after: row.get(5)?,
        correction_stability_before: row.get(6)?,
        correction_stability_after: row.get(7)?,
        reason: row.get(8)?,
        actor: row.get(9)?,
        created_at: row.get(10)?,
        is_undone: row.get::<_, i64>(11)? != 0,
        undone_at: row.get(12)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================
