//! Context orchestration (L1)
//!
//! Single entry point the tool transport calls: pick a mode, drive the
//! retrieval pipeline, strengthen what was served, dedup against the
//! session, and wrap everything in the response envelope.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::json;

use crate::search::reranker::{
    CrossEncoderReranker, RerankCandidate, RerankOptions,
};
use crate::search::scoring::{apply_scoring, ScoreOptions, ScoredMemory, ScoringCandidate};
use crate::session::SessionSave;
use crate::storage::{Store, UnifiedSearchOptions};

// ============================================================================
// ENVELOPE
// ============================================================================

/// Estimated characters per token for budget accounting.
const CHARS_PER_TOKEN: usize = 4;

/// Layer tag used in orchestration-level validation errors.
const LAYER: &str = "L1:Orchestration";

/// Response metadata carried by every envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMeta {
    pub tool: String,
    pub token_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

/// Uniform handler response shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub summary: String,
    pub data: serde_json::Value,
    pub hints: Vec<String>,
    pub meta: EnvelopeMeta,
}

/// Structured recovery guidance flattened into `hints` on errors.
#[derive(Debug, Clone, Default)]
pub struct Recovery {
    pub hint: String,
    pub actions: Vec<String>,
    pub tool_tip: Option<String>,
}

impl Envelope {
    /// Successful envelope; token count estimated from the serialized data.
    pub fn success(
        tool: &str,
        summary: impl Into<String>,
        data: serde_json::Value,
        hints: Vec<String>,
    ) -> Self {
        let token_count = estimate_tokens(&data);
        Self {
            summary: summary.into(),
            data,
            hints,
            meta: EnvelopeMeta {
                tool: tool.to_string(),
                token_count,
                latency_ms: None,
                cache_hit: false,
                is_error: None,
                severity: None,
            },
        }
    }

    /// Error envelope: message prefixed with `Error: `, recovery flattened
    /// into hints, never mutates state.
    pub fn error(tool: &str, message: impl Into<String>, recovery: Recovery) -> Self {
        let mut hints = Vec::new();
        if !recovery.hint.is_empty() {
            hints.push(recovery.hint);
        }
        hints.extend(recovery.actions);
        if let Some(tip) = recovery.tool_tip {
            hints.push(tip);
        }
        Self {
            summary: format!("Error: {}", message.into()),
            data: json!({}),
            hints,
            meta: EnvelopeMeta {
                tool: tool.to_string(),
                token_count: 0,
                latency_ms: None,
                cache_hit: false,
                is_error: Some(true),
                severity: Some("error".to_string()),
            },
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.meta.latency_ms = Some(latency_ms);
        self
    }

    pub fn is_error(&self) -> bool {
        self.meta.is_error.unwrap_or(false)
    }
}

/// ~4 chars per token of the serialized data.
pub fn estimate_tokens(data: &serde_json::Value) -> usize {
    serde_json::to_string(data)
        .map(|s| s.len() / CHARS_PER_TOKEN)
        .unwrap_or(0)
}

// ============================================================================
// MODES & INTENTS
// ============================================================================

/// Context retrieval mode with its token budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    /// Adaptive: classify intent, then pick a concrete mode.
    #[default]
    Auto,
    /// Trigger-phrase match only.
    Quick,
    /// Full hybrid search with scoring and optional rerank.
    Deep,
    /// Intent-narrowed hybrid search.
    Focused,
    /// Restore the last session state.
    Resume,
}

impl ContextMode {
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "quick" => ContextMode::Quick,
            "deep" => ContextMode::Deep,
            "focused" => ContextMode::Focused,
            "resume" => ContextMode::Resume,
            _ => ContextMode::Auto,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextMode::Auto => "auto",
            ContextMode::Quick => "quick",
            ContextMode::Deep => "deep",
            ContextMode::Focused => "focused",
            ContextMode::Resume => "resume",
        }
    }

    /// Token budget for concrete modes; `Auto` inherits from whatever mode
    /// it resolves to.
    pub fn token_budget(&self) -> Option<usize> {
        match self {
            ContextMode::Auto => None,
            ContextMode::Quick => Some(800),
            ContextMode::Deep => Some(2000),
            ContextMode::Focused => Some(1500),
            ContextMode::Resume => Some(1200),
        }
    }
}

/// Closed intent set for the intent → mode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    AddFeature,
    Refactor,
    SecurityAudit,
    FixBug,
    Understand,
}

impl Intent {
    /// Mode assignment for each intent in the closed set.
    pub fn mode(&self) -> ContextMode {
        match self {
            Intent::AddFeature | Intent::Refactor | Intent::SecurityAudit => ContextMode::Deep,
            Intent::FixBug | Intent::Understand => ContextMode::Focused,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::AddFeature => "add_feature",
            Intent::Refactor => "refactor",
            Intent::SecurityAudit => "security_audit",
            Intent::FixBug => "fix_bug",
            Intent::Understand => "understand",
        }
    }

    /// Lightweight keyword classifier over the input text.
    pub fn classify(input: &str) -> Option<Intent> {
        let lower = input.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if has(&["security", "audit", "vulnerab", "cve", "exploit"]) {
            Some(Intent::SecurityAudit)
        } else if has(&["fix", "bug", "broken", "error", "crash", "fails", "failing"]) {
            Some(Intent::FixBug)
        } else if has(&["refactor", "clean up", "cleanup", "restructure", "simplify"]) {
            Some(Intent::Refactor)
        } else if has(&["add ", "implement", "build ", "create ", "feature", "support for"]) {
            Some(Intent::AddFeature)
        } else if has(&["understand", "explain", "how does", "what is", "where is", "why does"]) {
            Some(Intent::Understand)
        } else {
            None
        }
    }

    /// Query terms that narrow focused-mode search toward the intent.
    fn narrowing_terms(&self) -> &'static [&'static str] {
        match self {
            Intent::AddFeature => &["pattern", "decision"],
            Intent::Refactor => &["pattern", "constraint"],
            Intent::SecurityAudit => &["constraint", "decision"],
            Intent::FixBug => &["fix", "error"],
            Intent::Understand => &["decision", "note"],
        }
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

/// Options for [`ContextOrchestrator::get_context`].
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    /// Session for dedup and resume.
    pub session_id: Option<String>,
    /// Spec-folder filter applied to every search path.
    pub spec_folder: Option<String>,
    /// Cap on returned memories before the token budget applies.
    pub limit: Option<usize>,
}

/// Unified context entry point.
pub struct ContextOrchestrator {
    store: Arc<Store>,
    reranker: CrossEncoderReranker,
}

impl ContextOrchestrator {
    pub fn new(store: Arc<Store>) -> Self {
        let reranker = CrossEncoderReranker::from_config(store.config());
        Self { store, reranker }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Clear per-session reranker state (latency stats, circuit breaker).
    pub fn reset_session(&self) {
        self.reranker.reset_session();
    }

    /// Retrieve context for `input` under the given mode.
    pub async fn get_context(
        &self,
        input: &str,
        mode: ContextMode,
        opts: &ContextOptions,
    ) -> Envelope {
        let started = Instant::now();
        let tool = "get_context";

        if input.trim().is_empty() {
            return Envelope::error(
                tool,
                format!("{LAYER}: input must be a non-empty string"),
                Recovery {
                    hint: "Provide the task or question you need context for.".to_string(),
                    actions: vec![
                        "Retry with a short description of what you are working on.".to_string(),
                    ],
                    tool_tip: Some("Example: get_context(\"fix the login crash\")".to_string()),
                },
            );
        }

        let intent = Intent::classify(input);
        let resolved = match mode {
            ContextMode::Auto => intent.map(|i| i.mode()).unwrap_or_else(|| {
                // Adaptive fallback: terse inputs are trigger lookups,
                // resumption phrasing restores the session, the rest gets
                // the full pipeline.
                let lower = input.to_lowercase();
                if lower.contains("resume") || lower.contains("continue") {
                    ContextMode::Resume
                } else if input.split_whitespace().count() < 4 {
                    ContextMode::Quick
                } else {
                    ContextMode::Deep
                }
            }),
            concrete => concrete,
        };
        let budget = resolved.token_budget().unwrap_or(2000);

        let envelope = match resolved {
            ContextMode::Quick => self.quick(input, opts, budget),
            ContextMode::Deep => self.search(input, intent, opts, budget, false).await,
            ContextMode::Focused => self.search(input, intent, opts, budget, true).await,
            ContextMode::Resume => self.resume(opts, budget),
            ContextMode::Auto => unreachable!("auto resolves to a concrete mode"),
        };

        envelope.with_latency(started.elapsed().as_millis() as u64)
    }

    /// Quick mode: trigger-phrase match only.
    fn quick(&self, input: &str, opts: &ContextOptions, budget: usize) -> Envelope {
        let tool = "get_context";
        let limit = opts.limit.unwrap_or(5);

        let matched = match self
            .store
            .trigger_match(input, opts.spec_folder.as_deref(), limit)
        {
            Ok(matched) => matched,
            Err(e) => return Envelope::error(tool, e.to_string(), Recovery::default()),
        };

        let mut served = Vec::new();
        for memory in matched {
            match self.store.strengthen_on_access(memory.id) {
                Ok(updated) => served.push(updated),
                Err(e) => {
                    tracing::warn!("strengthen failed for memory {}: {e}", memory.id);
                    served.push(memory);
                }
            }
        }

        let (served, dedup) = self.dedup(opts, served);
        let payload = budgeted_payload(
            served
                .iter()
                .map(|m| {
                    json!({
                        "id": m.id,
                        "title": m.title,
                        "anchorId": m.anchor_id,
                        "specFolder": m.spec_folder,
                        "content": m.content,
                    })
                })
                .collect(),
            budget,
        );

        let count = payload.len();
        let data = json!({
            "mode": "quick",
            "tokenBudget": budget,
            "memories": payload,
            "dedup": dedup,
        });
        Envelope::success(
            tool,
            format!("Quick context: {count} trigger-matched memories"),
            data,
            vec![],
        )
    }

    /// Deep / focused mode: hybrid search, composite scoring, optional
    /// rerank, strengthen, dedup.
    async fn search(
        &self,
        input: &str,
        intent: Option<Intent>,
        opts: &ContextOptions,
        budget: usize,
        narrowed: bool,
    ) -> Envelope {
        let tool = "get_context";
        let limit = opts.limit.unwrap_or(10);

        let query = if narrowed {
            match intent {
                Some(intent) => {
                    let mut q = input.to_string();
                    for term in intent.narrowing_terms() {
                        q.push(' ');
                        q.push_str(term);
                    }
                    q
                }
                None => input.to_string(),
            }
        } else {
            input.to_string()
        };

        let search_opts = UnifiedSearchOptions {
            limit: limit * 2,
            spec_folder: opts.spec_folder.clone(),
            expand: crate::search::fuzzy::ExpandOptions {
                enabled: self.store.config().fuzzy_match_enabled,
                ..Default::default()
            },
            include_graph: true,
        };

        let hits = match self.store.unified_search(&query, &search_opts) {
            Ok(hits) => hits,
            Err(e) => return Envelope::error(tool, e.to_string(), Recovery::default()),
        };

        let candidates: Vec<ScoringCandidate> = hits
            .iter()
            .map(|hit| ScoringCandidate {
                memory: hit.memory.clone(),
                similarity_pct: hit.similarity.map(|s| s as f64 * 100.0).unwrap_or(0.0),
            })
            .collect();
        let mut scored = apply_scoring(candidates, &ScoreOptions::new(input));
        scored.truncate(limit);

        // Optional second stage; any failure inside degrades to the scored
        // order without blocking.
        let rerank_candidates: Vec<RerankCandidate> = scored
            .iter()
            .map(|s| RerankCandidate {
                id: s.memory.id,
                content: s.memory.content.clone(),
            })
            .collect();
        let rerank = self
            .reranker
            .rerank(input, &rerank_candidates, &RerankOptions::default())
            .await;
        if rerank.metadata.reranking_applied {
            let order: Vec<i64> = rerank.results.iter().map(|r| r.id).collect();
            scored.sort_by_key(|s| {
                order
                    .iter()
                    .position(|id| *id == s.memory.id)
                    .unwrap_or(usize::MAX)
            });
        }

        let mut served: Vec<ScoredMemory> = Vec::with_capacity(scored.len());
        for mut s in scored {
            match self.store.strengthen_on_access(s.memory.id) {
                Ok(updated) => s.memory = updated,
                Err(e) => tracing::warn!("strengthen failed for memory {}: {e}", s.memory.id),
            }
            served.push(s);
        }

        let memories: Vec<crate::memory::Memory> =
            served.iter().map(|s| s.memory.clone()).collect();
        let (kept, dedup) = self.dedup(opts, memories);
        let kept_ids: Vec<i64> = kept.iter().map(|m| m.id).collect();
        served.retain(|s| kept_ids.contains(&s.memory.id));

        let payload = budgeted_payload(
            served
                .iter()
                .map(|s| {
                    json!({
                        "id": s.memory.id,
                        "title": s.memory.title,
                        "anchorId": s.memory.anchor_id,
                        "specFolder": s.memory.spec_folder,
                        "content": s.memory.content,
                        "compositeScore": s.composite_score,
                        "factors": s.breakdown,
                        "similarityPct": s.similarity_pct,
                    })
                })
                .collect(),
            budget,
        );

        let mode = if narrowed { "focused" } else { "deep" };
        let count = payload.len();
        let mut hints = Vec::new();
        if !self.store.embeddings().is_ready() {
            hints.push(
                "Embedding provider unavailable; results are lexical-only.".to_string(),
            );
        }

        let data = json!({
            "mode": mode,
            "intent": intent.map(|i| i.as_str()),
            "tokenBudget": budget,
            "memories": payload,
            "dedup": dedup,
            "rerank": rerank.metadata,
        });
        Envelope::success(
            tool,
            format!("{mode} context: {count} memories"),
            data,
            hints,
        )
    }

    /// Resume mode: last session state plus anchors and next steps.
    fn resume(&self, opts: &ContextOptions, budget: usize) -> Envelope {
        let tool = "get_context";

        let Some(session_id) = opts.session_id.as_deref() else {
            return Envelope::error(
                tool,
                format!("{LAYER}: resume mode requires a session id"),
                Recovery {
                    hint: "Pass the session id you want to resume.".to_string(),
                    actions: vec!["List interrupted sessions to find one.".to_string()],
                    tool_tip: None,
                },
            );
        };

        let state = match self.store.recover_session(session_id) {
            Ok(state) => state,
            Err(e) => return Envelope::error(tool, e.to_string(), Recovery::default()),
        };

        let Some(state) = state else {
            let data = json!({ "mode": "resume", "_recovered": false });
            return Envelope::success(
                tool,
                format!("No stored state for session {session_id}"),
                data,
                vec!["Start fresh; a checkpoint will create resumable state.".to_string()],
            );
        };

        // Recent anchors from the session's spec folder give the caller
        // something concrete to re-open.
        let anchors = state
            .spec_folder
            .as_deref()
            .and_then(|folder| {
                self.store
                    .unified_search(
                        state.current_task.as_deref().unwrap_or("recent work"),
                        &UnifiedSearchOptions {
                            limit: 5,
                            spec_folder: Some(folder.to_string()),
                            ..Default::default()
                        },
                    )
                    .ok()
            })
            .unwrap_or_default();

        let recovered = state.recovered;
        let data = json!({
            "mode": "resume",
            "_recovered": recovered,
            "tokenBudget": budget,
            "session": state,
            "anchors": anchors
                .iter()
                .map(|h| json!({
                    "id": h.memory.id,
                    "title": h.memory.title,
                    "anchorId": h.memory.anchor_id,
                    "filePath": h.memory.file_path,
                }))
                .collect::<Vec<_>>(),
        });

        let summary = if recovered {
            format!("Recovered interrupted session {session_id}")
        } else {
            format!("Session {session_id} state loaded")
        };
        Envelope::success(tool, summary, data, vec![])
    }

    /// Session dedup filter; a missing session id disables it.
    fn dedup(
        &self,
        opts: &ContextOptions,
        memories: Vec<crate::memory::Memory>,
    ) -> (Vec<crate::memory::Memory>, serde_json::Value) {
        match opts.session_id.as_deref() {
            Some(session_id) => match self.store.filter_unsent(session_id, memories) {
                Ok(outcome) => {
                    let stats = serde_json::to_value(&outcome.stats).unwrap_or(json!({}));
                    (outcome.filtered, stats)
                }
                Err(e) => {
                    tracing::warn!("session dedup failed, serving unfiltered: {e}");
                    (vec![], json!({ "enabled": false }))
                }
            },
            None => {
                let total = memories.len();
                (
                    memories,
                    json!({ "total": total, "filtered": 0, "enabled": false, "tokenSavings": 0 }),
                )
            }
        }
    }

    /// Write path: route content through the prediction-error gate and
    /// report the decision in an envelope.
    pub fn remember(&self, input: &crate::memory::MemoryInput, opts: &crate::gate::GateOptions) -> Envelope {
        let tool = "remember";
        let started = Instant::now();
        match self.store.gated_write(input, opts) {
            Ok(result) => {
                let action = result.decision.action();
                let data = json!({
                    "action": action,
                    "similarity": result.decision.similarity(),
                    "reason": result.decision.reason(),
                    "memoryId": result.memory.as_ref().map(|m| m.id),
                    "correctionId": result.correction_id,
                });
                Envelope::success(tool, format!("Write gated as {action}"), data, vec![])
                    .with_latency(started.elapsed().as_millis() as u64)
            }
            Err(e) => Envelope::error(tool, e.to_string(), Recovery::default()),
        }
    }

    /// Checkpoint the session and write `CONTINUE_SESSION.md`.
    pub fn checkpoint(
        &self,
        session_id: &str,
        save: &SessionSave,
        spec_folder: &Path,
    ) -> Envelope {
        let tool = "checkpoint";
        match self.store.checkpoint(session_id, save, spec_folder) {
            Ok(path) => Envelope::success(
                tool,
                format!("Checkpoint saved for session {session_id}"),
                json!({ "sessionId": session_id, "continueFile": path.display().to_string() }),
                vec!["Resume later with get_context mode=resume".to_string()],
            ),
            Err(e) => Envelope::error(tool, e.to_string(), Recovery::default()),
        }
    }

    /// Engine statistics in an envelope.
    pub fn system_stats(&self) -> Envelope {
        let tool = "system_stats";
        match self.store.stats() {
            Ok(stats) => {
                let summary = format!(
                    "{} memories, {} corrections, {} sessions",
                    stats.total_memories, stats.corrections, stats.sessions
                );
                let data = serde_json::to_value(&stats).unwrap_or(json!({}));
                Envelope::success(tool, summary, data, vec![])
            }
            Err(e) => Envelope::error(tool, e.to_string(), Recovery::default()),
        }
    }

    /// A memory's correction chain plus ledger counters.
    pub fn corrections(&self, memory_id: i64) -> Envelope {
        let tool = "corrections";
        let chain = match self.store.correction_chain(memory_id) {
            Ok(chain) => chain,
            Err(e) => return Envelope::error(tool, e.to_string(), Recovery::default()),
        };
        let stats = match self.store.corrections_stats() {
            Ok(stats) => stats,
            Err(e) => return Envelope::error(tool, e.to_string(), Recovery::default()),
        };
        let total = chain.total;
        let data = json!({
            "memoryId": memory_id,
            "chain": chain,
            "stats": stats,
        });
        Envelope::success(
            tool,
            format!("{total} corrections recorded for memory {memory_id}"),
            data,
            vec![],
        )
    }

    /// Undo a correction, reporting the restored record.
    pub fn undo_correction(&self, correction_id: i64) -> Envelope {
        let tool = "undo_correction";
        match self.store.undo_correction(correction_id) {
            Ok(outcome) => match outcome.record() {
                Some(record) => Envelope::success(
                    tool,
                    format!("Correction {correction_id} undone"),
                    serde_json::to_value(record).unwrap_or(json!({})),
                    vec![],
                ),
                None => Envelope::success(
                    tool,
                    "Corrections are disabled",
                    json!({ "skipped": true }),
                    vec!["Set ENABLE_RELATIONS=true to activate the ledger.".to_string()],
                ),
            },
            Err(e) => Envelope::error(tool, e.to_string(), Recovery::default()),
        }
    }

    /// Interrupted sessions, most recent first.
    pub fn interrupted_sessions(&self) -> Envelope {
        let tool = "interrupted_sessions";
        match self.store.list_interrupted() {
            Ok(sessions) => {
                let count = sessions.len();
                Envelope::success(
                    tool,
                    format!("{count} interrupted sessions"),
                    json!({ "sessions": sessions }),
                    if count > 0 {
                        vec!["Recover one with get_context mode=resume.".to_string()]
                    } else {
                        vec![]
                    },
                )
            }
            Err(e) => Envelope::error(tool, e.to_string(), Recovery::default()),
        }
    }
}

/// Keep whole memories until the serialized payload would exceed the token
/// budget.
fn budgeted_payload(items: Vec<serde_json::Value>, budget: usize) -> Vec<serde_json::Value> {
    let mut kept = Vec::new();
    let mut spent = 0usize;
    for item in items {
        let cost = serde_json::to_string(&item).map(|s| s.len()).unwrap_or(0) / CHARS_PER_TOKEN;
        if !kept.is_empty() && spent + cost > budget {
            break;
        }
        spent += cost;
        kept.push(item);
    }
    kept
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::embeddings::EmbeddingService;
    use crate::memory::MemoryInput;
    use tempfile::TempDir;

    fn orchestrator() -> (ContextOrchestrator, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(
            Some(dir.path().join("test.db")),
            EngineConfig::default(),
            EmbeddingService::disabled(),
        )
        .unwrap();
        (ContextOrchestrator::new(Arc::new(store)), dir)
    }

    fn seed(orch: &ContextOrchestrator, anchor: &str, content: &str) -> i64 {
        orch.store()
            .insert_memory(&MemoryInput {
                spec_folder: "specs/demo".to_string(),
                file_path: "memory/demo.md".to_string(),
                anchor_id: anchor.to_string(),
                title: format!("memory {anchor}"),
                content: content.to_string(),
                ..Default::default()
            })
            .unwrap()
            .id
    }

    #[test]
    fn intent_table_is_closed() {
        assert_eq!(Intent::AddFeature.mode(), ContextMode::Deep);
        assert_eq!(Intent::Refactor.mode(), ContextMode::Deep);
        assert_eq!(Intent::SecurityAudit.mode(), ContextMode::Deep);
        assert_eq!(Intent::FixBug.mode(), ContextMode::Focused);
        assert_eq!(Intent::Understand.mode(), ContextMode::Focused);
    }

    #[test]
    fn mode_budgets() {
        assert_eq!(ContextMode::Quick.token_budget(), Some(800));
        assert_eq!(ContextMode::Deep.token_budget(), Some(2000));
        assert_eq!(ContextMode::Focused.token_budget(), Some(1500));
        assert_eq!(ContextMode::Resume.token_budget(), Some(1200));
        assert_eq!(ContextMode::Auto.token_budget(), None);
    }

    #[test]
    fn intent_classifier_keywords() {
        assert_eq!(
            Intent::classify("fix the login crash"),
            Some(Intent::FixBug)
        );
        assert_eq!(
            Intent::classify("security audit of the session layer"),
            Some(Intent::SecurityAudit)
        );
        assert_eq!(
            Intent::classify("refactor the storage module"),
            Some(Intent::Refactor)
        );
        assert_eq!(Intent::classify("zzz qqq"), None);
    }

    #[tokio::test]
    async fn empty_input_is_a_structured_error() {
        let (orch, _dir) = orchestrator();
        let envelope = orch
            .get_context("   ", ContextMode::Auto, &ContextOptions::default())
            .await;
        assert!(envelope.is_error());
        assert!(envelope.summary.starts_with("Error: "));
        assert!(envelope.summary.contains("L1:Orchestration"));
        assert!(!envelope.hints.is_empty());
    }

    #[tokio::test]
    async fn deep_mode_serves_scored_memories() {
        let (orch, _dir) = orchestrator();
        seed(&orch, "a1", "the retrieval pipeline fuses vector and lexical search");
        seed(&orch, "a2", "sessions checkpoint their state into a markdown file");

        let envelope = orch
            .get_context(
                "implement changes to the retrieval pipeline fusion",
                ContextMode::Deep,
                &ContextOptions::default(),
            )
            .await;
        assert!(!envelope.is_error());
        assert_eq!(envelope.data["mode"], "deep");
        let memories = envelope.data["memories"].as_array().unwrap();
        assert!(!memories.is_empty());
        assert!(memories[0]["compositeScore"].is_number());
        assert!(envelope.meta.token_count > 0);
        assert!(envelope.meta.latency_ms.is_some());
    }

    #[tokio::test]
    async fn retrieval_strengthens_served_memories() {
        let (orch, _dir) = orchestrator();
        let id = seed(&orch, "a1", "strengthening happens exactly once per hit per call");

        orch.get_context(
            "tell me about strengthening once per hit",
            ContextMode::Deep,
            &ContextOptions::default(),
        )
        .await;

        let memory = orch.store().get_memory(id).unwrap().unwrap();
        assert_eq!(memory.review_count, 1);
        assert!(memory.stability > 1.0);
    }

    #[tokio::test]
    async fn session_dedup_suppresses_second_serving() {
        let (orch, _dir) = orchestrator();
        seed(&orch, "a1", "deduplicated content served at most once per session");

        let opts = ContextOptions {
            session_id: Some("s1".to_string()),
            ..Default::default()
        };
        let first = orch
            .get_context("deduplicated content served", ContextMode::Deep, &opts)
            .await;
        assert_eq!(first.data["memories"].as_array().unwrap().len(), 1);

        let second = orch
            .get_context("deduplicated content served", ContextMode::Deep, &opts)
            .await;
        assert_eq!(second.data["memories"].as_array().unwrap().len(), 0);
        assert_eq!(second.data["dedup"]["filtered"], 1);
    }

    #[tokio::test]
    async fn quick_mode_matches_triggers() {
        let (orch, _dir) = orchestrator();
        orch.store()
            .insert_memory(&MemoryInput {
                spec_folder: "specs/demo".to_string(),
                file_path: "memory/demo.md".to_string(),
                anchor_id: "t1".to_string(),
                title: "deploy runbook".to_string(),
                trigger_phrases: vec!["deploy checklist".to_string()],
                content: "before deploying run the checklist and check the dashboards".to_string(),
                ..Default::default()
            })
            .unwrap();

        let envelope = orch
            .get_context(
                "where is the deploy checklist again",
                ContextMode::Quick,
                &ContextOptions::default(),
            )
            .await;
        assert_eq!(envelope.data["mode"], "quick");
        assert_eq!(envelope.data["memories"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resume_mode_recovers_interrupted_sessions() {
        let (orch, _dir) = orchestrator();
        orch.store()
            .save_session(
                "s1",
                &SessionSave {
                    current_task: Some("wire the reranker".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        orch.store().reset_interrupted().unwrap();

        let opts = ContextOptions {
            session_id: Some("s1".to_string()),
            ..Default::default()
        };
        let envelope = orch
            .get_context("resume where I left off", ContextMode::Resume, &opts)
            .await;
        assert!(!envelope.is_error());
        assert_eq!(envelope.data["_recovered"], true);

        // Unknown session yields _recovered=false, not an error.
        let missing = ContextOptions {
            session_id: Some("ghost".to_string()),
            ..Default::default()
        };
        let envelope = orch
            .get_context("resume", ContextMode::Resume, &missing)
            .await;
        assert!(!envelope.is_error());
        assert_eq!(envelope.data["_recovered"], false);
    }

    #[tokio::test]
    async fn auto_mode_routes_by_intent() {
        let (orch, _dir) = orchestrator();
        seed(&orch, "a1", "the login handler validates credentials and sessions");

        let envelope = orch
            .get_context(
                "fix the broken login handler crash",
                ContextMode::Auto,
                &ContextOptions::default(),
            )
            .await;
        assert_eq!(envelope.data["mode"], "focused");
        assert_eq!(envelope.data["intent"], "fix_bug");
    }

    #[test]
    fn handler_wrappers_use_the_envelope() {
        let (orch, _dir) = orchestrator();
        seed(&orch, "a1", "a memory so the statistics have something to count");

        let stats = orch.system_stats();
        assert!(!stats.is_error());
        assert_eq!(stats.data["totalMemories"], 1);
        assert_eq!(stats.meta.tool, "system_stats");

        // Relations are disabled by default: undo reports skipped.
        let undo = orch.undo_correction(1);
        assert!(!undo.is_error());
        assert_eq!(undo.data["skipped"], true);

        let sessions = orch.interrupted_sessions();
        assert_eq!(sessions.data["sessions"].as_array().unwrap().len(), 0);

        let corrections = orch.corrections(1);
        assert!(!corrections.is_error());
        assert_eq!(corrections.data["chain"]["total"], 0);
    }

    #[test]
    fn token_estimate_is_serialized_length_over_four() {
        let data = json!({"k": "0123456789"});
        // {"k":"0123456789"} = 18 chars -> 4 tokens
        assert_eq!(estimate_tokens(&data), 18 / 4);
    }

    #[test]
    fn budget_keeps_at_least_one_item() {
        let items = vec![json!({"content": "x".repeat(8000)}), json!({"b": 2})];
        let kept = budgeted_payload(items, 10);
        assert_eq!(kept.len(), 1);
    }
}
