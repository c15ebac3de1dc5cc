//! Session layer
//!
//! Two cooperating pieces of per-session state:
//!
//! - a dedup set of memory hashes already sent to the session, so repeated
//!   retrievals stop re-spending tokens on the same content, and
//! - a crash-recoverable state row with an `active/completed/interrupted`
//!   lifecycle, checkpointable to a human-readable `CONTINUE_SESSION.md`.
//!
//! Sessions are fully isolated: nothing sent in one session suppresses a
//! memory in another.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::error::{EngineError, Result};
use crate::memory::Memory;
use crate::storage::Store;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Token estimate saved per filtered (deduplicated) memory.
pub const TOKEN_SAVINGS_PER_MEMORY: usize = 200;

/// Checkpoint file name written into the spec folder.
pub const CONTINUE_FILE_NAME: &str = "CONTINUE_SESSION.md";

// ============================================================================
// TYPES
// ============================================================================

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Interrupted,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Interrupted => "interrupted",
        }
    }

    fn parse_name(s: &str) -> Self {
        match s {
            "completed" => SessionStatus::Completed,
            "interrupted" => SessionStatus::Interrupted,
            _ => SessionStatus::Active,
        }
    }
}

/// Stored session state.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: String,
    pub status: SessionStatus,
    pub spec_folder: Option<String>,
    pub current_task: Option<String>,
    pub last_action: Option<String>,
    pub context_summary: Option<String>,
    pub pending_work: Option<String>,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// True when this state was just recovered from an interruption.
    #[serde(rename = "_recovered")]
    pub recovered: bool,
}

/// Mutable fields for [`Store::save_session`].
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSave {
    pub spec_folder: Option<String>,
    pub current_task: Option<String>,
    pub last_action: Option<String>,
    pub context_summary: Option<String>,
    pub pending_work: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Dedup statistics from [`Store::filter_unsent`].
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupStats {
    pub total: usize,
    pub filtered: usize,
    pub enabled: bool,
    pub token_savings: usize,
}

/// Filtered results plus stats.
#[derive(Debug)]
pub struct FilterOutcome {
    pub filtered: Vec<Memory>,
    pub stats: DedupStats,
}

// ============================================================================
// DEDUP HASH
// ============================================================================

/// Fresh session identifier for callers that do not bring their own.
pub fn new_session_id() -> String {
    format!("session-{}", uuid::Uuid::new_v4())
}

/// Stable 16-hex-char dedup hash for a memory: content hash when present,
/// otherwise the identity triple.
pub fn memory_hash(memory: &Memory) -> String {
    let seed = match &memory.content_hash {
        Some(hash) if !hash.is_empty() => hash.clone(),
        _ => format!("{}|{}|{}", memory.id, memory.anchor_id, memory.file_path),
    };
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}

// ============================================================================
// DEDUP OPERATIONS
// ============================================================================

impl Store {
    /// Whether this memory should still be sent to the session.
    pub fn should_send(&self, session_id: &str, memory: &Memory) -> Result<bool> {
        let hash = memory_hash(memory);
        let cutoff = Utc::now().timestamp_millis() - self.config().sent_ttl_ms;
        let reader = self.reader()?;
        let seen: Option<i64> = reader
            .query_row(
                "SELECT sent_at FROM session_sent
                 WHERE session_id = ?1 AND memory_hash = ?2 AND sent_at >= ?3",
                params![session_id, hash, cutoff],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seen.is_none())
    }

    /// Record that a memory was sent. Evicts expired entries and, past the
    /// per-session cap, the oldest entries. Returns the dedup hash.
    pub fn mark_sent(&self, session_id: &str, memory: &Memory) -> Result<String> {
        let hash = memory_hash(memory);
        let now = Utc::now().timestamp_millis();
        let cutoff = now - self.config().sent_ttl_ms;
        let max_entries = self.config().max_sent_per_session;

        let mut writer = self.writer()?;
        let tx = writer.transaction()?;
        tx.execute(
            "DELETE FROM session_sent WHERE session_id = ?1 AND sent_at < ?2",
            params![session_id, cutoff],
        )?;
        tx.execute(
            "INSERT INTO session_sent (session_id, memory_hash, sent_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id, memory_hash) DO UPDATE SET sent_at = excluded.sent_at",
            params![session_id, hash, now],
        )?;
        tx.execute(
            "DELETE FROM session_sent WHERE session_id = ?1 AND memory_hash NOT IN (
                 SELECT memory_hash FROM session_sent WHERE session_id = ?1
                 ORDER BY sent_at DESC LIMIT ?2
             )",
            params![session_id, max_entries as i64],
        )?;
        tx.commit()?;
        Ok(hash)
    }

    /// Split results into unseen (kept and marked sent) and already-sent,
    /// reporting estimated token savings.
    pub fn filter_unsent(&self, session_id: &str, results: Vec<Memory>) -> Result<FilterOutcome> {
        let total = results.len();
        let mut kept = Vec::with_capacity(total);
        for memory in results {
            if self.should_send(session_id, &memory)? {
                self.mark_sent(session_id, &memory)?;
                kept.push(memory);
            }
        }
        let filtered = total - kept.len();
        Ok(FilterOutcome {
            filtered: kept,
            stats: DedupStats {
                total,
                filtered,
                enabled: true,
                token_savings: TOKEN_SAVINGS_PER_MEMORY * filtered,
            },
        })
    }

    // ========================================================================
    // SESSION STATE
    // ========================================================================

    /// Upsert the session row as `active`. Durable before returning.
    pub fn save_session(&self, session_id: &str, save: &SessionSave) -> Result<()> {
        if session_id.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "session id cannot be empty".to_string(),
            ));
        }
        let now = Utc::now();
        let data = serde_json::to_string(&save.data).unwrap_or_else(|_| "{}".to_string());
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO sessions (
                session_id, status, spec_folder, current_task, last_action,
                context_summary, pending_work, state_json, created_at, updated_at
            ) VALUES (?1, 'active', ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ON CONFLICT(session_id) DO UPDATE SET
                status = 'active',
                spec_folder = excluded.spec_folder,
                current_task = excluded.current_task,
                last_action = excluded.last_action,
                context_summary = excluded.context_summary,
                pending_work = excluded.pending_work,
                state_json = excluded.state_json,
                updated_at = excluded.updated_at",
            params![
                session_id,
                save.spec_folder,
                save.current_task,
                save.last_action,
                save.context_summary,
                save.pending_work,
                data,
                now,
            ],
        )?;
        Ok(())
    }

    /// Transition `active → completed`.
    pub fn complete_session(&self, session_id: &str) -> Result<()> {
        let writer = self.writer()?;
        let changed = writer.execute(
            "UPDATE sessions SET status = 'completed', updated_at = ?1
             WHERE session_id = ?2 AND status = 'active'",
            params![Utc::now(), session_id],
        )?;
        if changed == 0 {
            return Err(EngineError::NotFound(format!(
                "active session {session_id}"
            )));
        }
        Ok(())
    }

    /// Startup sweep: every `active` row becomes `interrupted`. Idempotent;
    /// `completed` rows are untouched. Returns the transition count.
    pub fn reset_interrupted(&self) -> Result<usize> {
        let writer = self.writer()?;
        let changed = writer.execute(
            "UPDATE sessions SET status = 'interrupted', updated_at = ?1
             WHERE status = 'active'",
            params![Utc::now()],
        )?;
        if changed > 0 {
            tracing::info!("marked {changed} active sessions as interrupted");
        }
        Ok(changed)
    }

    /// Recover a session: an `interrupted` row transitions back to `active`
    /// and is returned with `_recovered=true`. Other rows come back
    /// unchanged with `_recovered=false`; unknown ids yield `None`.
    pub fn recover_session(&self, session_id: &str) -> Result<Option<SessionState>> {
        let state = self.get_session(session_id)?;
        let Some(mut state) = state else {
            return Ok(None);
        };

        if state.status != SessionStatus::Interrupted {
            return Ok(Some(state));
        }

        let writer = self.writer()?;
        writer.execute(
            "UPDATE sessions SET status = 'active', updated_at = ?1 WHERE session_id = ?2",
            params![Utc::now(), session_id],
        )?;
        state.status = SessionStatus::Active;
        state.recovered = true;
        Ok(Some(state))
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionState>> {
        let reader = self.reader()?;
        reader
            .query_row(
                "SELECT session_id, status, spec_folder, current_task, last_action,
                        context_summary, pending_work, state_json, created_at, updated_at
                 FROM sessions WHERE session_id = ?1",
                params![session_id],
                row_to_session,
            )
            .optional()
            .map_err(EngineError::from)
    }

    /// Interrupted sessions, most recently updated first.
    pub fn list_interrupted(&self) -> Result<Vec<SessionState>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT session_id, status, spec_folder, current_task, last_action,
                    context_summary, pending_work, state_json, created_at, updated_at
             FROM sessions WHERE status = 'interrupted'
             ORDER BY updated_at DESC",
        )?;
        let rows = stmt
            .query_map([], row_to_session)?
            .collect::<rusqlite::Result<Vec<SessionState>>>()?;
        Ok(rows)
    }

    /// Atomic save plus emission of `CONTINUE_SESSION.md` into the spec
    /// folder. Returns the checkpoint file path.
    pub fn checkpoint(
        &self,
        session_id: &str,
        save: &SessionSave,
        spec_folder: &Path,
    ) -> Result<PathBuf> {
        let mut save = save.clone();
        if save.spec_folder.is_none() {
            save.spec_folder = Some(spec_folder.display().to_string());
        }
        self.save_session(session_id, &save)?;

        std::fs::create_dir_all(spec_folder)?;
        let path = spec_folder.join(CONTINUE_FILE_NAME);
        std::fs::write(&path, render_continue_file(session_id, &save))?;
        tracing::info!(session_id, path = %path.display(), "session checkpoint written");
        Ok(path)
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionState> {
    let status: String = row.get(1)?;
    let state_json: String = row.get(7)?;
    Ok(SessionState {
        session_id: row.get(0)?,
        status: SessionStatus::parse_name(&status),
        spec_folder: row.get(2)?,
        current_task: row.get(3)?,
        last_action: row.get(4)?,
        context_summary: row.get(5)?,
        pending_work: row.get(6)?,
        data: serde_json::from_str(&state_json).unwrap_or(serde_json::Value::Null),
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        recovered: false,
    })
}

/// Render the fixed-section resume file.
fn render_continue_file(session_id: &str, save: &SessionSave) -> String {
    let unset = "(not set)";
    let data = if save.data.is_null() {
        "{}".to_string()
    } else {
        serde_json::to_string_pretty(&save.data).unwrap_or_else(|_| "{}".to_string())
    };

    format!(
        "# CONTINUE SESSION\n\n\
         ## Session State\n\n\
         - Session: `{session_id}`\n\
         - Spec folder: {spec_folder}\n\
         - Current task: {current_task}\n\
         - Last action: {last_action}\n\n\
         ## Context Summary\n\n\
         {context_summary}\n\n\
         ## Pending Work\n\n\
         {pending_work}\n\n\
         ## Quick Resume\n\n\
         Call `get_context` with mode `resume` and session `{session_id}` to \
         restore this state and pick up where the session left off.\n\n\
         ## Additional State Data\n\n\
         ```json\n{data}\n```\n",
        spec_folder = save.spec_folder.as_deref().unwrap_or(unset),
        current_task = save.current_task.as_deref().unwrap_or(unset),
        last_action = save.last_action.as_deref().unwrap_or(unset),
        context_summary = save.context_summary.as_deref().unwrap_or(unset),
        pending_work = save.pending_work.as_deref().unwrap_or(unset),
    )
}

// ============================================================================
// TESTS
// ============================================================================
