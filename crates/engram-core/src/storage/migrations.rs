//! Database migrations
//!
//! Forward-only numbered migrations. Re-running initialization on a
//! populated database is a no-op and preserves every row value, including
//! custom FSRS state.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: memories, embeddings, FTS5, conflicts, corrections",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Session state and per-session dedup tables",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Causal memory edges, citation tracking, FSRS retrieval index",
        up: MIGRATION_V3_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id INTEGER PRIMARY KEY,
    spec_folder TEXT NOT NULL,
    file_path TEXT NOT NULL,
    anchor_id TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    trigger_phrases TEXT NOT NULL DEFAULT '[]',
    summary TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL,
    content_hash TEXT,
    memory_type TEXT NOT NULL DEFAULT 'note',

    importance_tier TEXT NOT NULL DEFAULT 'normal'
        CHECK (importance_tier IN ('constitutional', 'critical', 'important', 'normal', 'temporary', 'deprecated')),
    importance_weight REAL NOT NULL DEFAULT 0.5,

    -- FSRS state
    stability REAL NOT NULL DEFAULT 1.0,
    difficulty REAL NOT NULL DEFAULT 5.0,
    last_review TEXT,
    review_count INTEGER NOT NULL DEFAULT 0,

    -- Access telemetry (epoch millis)
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed INTEGER,

    embedding_status TEXT NOT NULL DEFAULT 'pending'
        CHECK (embedding_status IN ('pending', 'success', 'failed')),

    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    UNIQUE (spec_folder, file_path, anchor_id)
);

CREATE INDEX IF NOT EXISTS idx_memories_stability ON memories(stability);
CREATE INDEX IF NOT EXISTS idx_memories_last_review ON memories(last_review);
CREATE INDEX IF NOT EXISTS idx_memories_spec_folder ON memories(spec_folder);
CREATE INDEX IF NOT EXISTS idx_memories_embedding_status ON memories(embedding_status);

-- Embeddings storage (binary f32-LE blob), lifecycle tied to the memory
CREATE TABLE IF NOT EXISTS memory_embeddings (
    memory_id INTEGER PRIMARY KEY REFERENCES memories(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    model TEXT NOT NULL DEFAULT 'external',
    created_at TEXT NOT NULL
);

-- FTS5 virtual table over the canonical text
CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    title,
    content,
    trigger_phrases,
    content='memories',
    content_rowid='id',
    tokenize='porter ascii'
);

-- Triggers keep FTS in sync with the canonical row
CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
    INSERT INTO memories_fts(rowid, title, content, trigger_phrases)
    VALUES (NEW.id, NEW.title, NEW.content, NEW.trigger_phrases);
END;

CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, title, content, trigger_phrases)
    VALUES ('delete', OLD.id, OLD.title, OLD.content, OLD.trigger_phrases);
END;

CREATE TRIGGER IF NOT EXISTS memories_au AFTER UPDATE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, title, content, trigger_phrases)
    VALUES ('delete', OLD.id, OLD.title, OLD.content, OLD.trigger_phrases);
    INSERT INTO memories_fts(rowid, title, content, trigger_phrases)
    VALUES (NEW.id, NEW.title, NEW.content, NEW.trigger_phrases);
END;

-- Prediction-error gate telemetry, append-only
CREATE TABLE IF NOT EXISTS conflicts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    new_content_hash TEXT NOT NULL,
    existing_memory_id INTEGER,
    similarity_score REAL NOT NULL,
    action TEXT NOT NULL
        CHECK (action IN ('CREATE', 'UPDATE', 'REINFORCE', 'SUPERSEDE', 'CREATE_LINKED')),
    notes TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conflicts_created ON conflicts(created_at);

-- Reversible corrections ledger
CREATE TABLE IF NOT EXISTS corrections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    original_memory_id INTEGER NOT NULL REFERENCES memories(id),
    replacement_memory_id INTEGER REFERENCES memories(id),
    correction_type TEXT NOT NULL
        CHECK (correction_type IN ('superseded', 'deprecated', 'refined', 'merged')),
    original_stability_before REAL NOT NULL,
    original_stability_after REAL NOT NULL,
    correction_stability_before REAL,
    correction_stability_after REAL,
    reason TEXT NOT NULL DEFAULT '',
    actor TEXT NOT NULL DEFAULT 'system',
    created_at TEXT NOT NULL,
    is_undone INTEGER NOT NULL DEFAULT 0,
    undone_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_corrections_original ON corrections(original_memory_id);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: Session layer
const MIGRATION_V2_UP: &str = r#"
-- Crash-recoverable per-session state, one row per session id
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'active'
        CHECK (status IN ('active', 'completed', 'interrupted')),
    spec_folder TEXT,
    current_task TEXT,
    last_action TEXT,
    context_summary TEXT,
    pending_work TEXT,
    state_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
CREATE INDEX IF NOT EXISTS idx_sessions_updated ON sessions(updated_at);

-- Read-time dedup membership, expired by TTL and bounded per session
CREATE TABLE IF NOT EXISTS session_sent (
    session_id TEXT NOT NULL,
    memory_hash TEXT NOT NULL,
    sent_at INTEGER NOT NULL,
    PRIMARY KEY (session_id, memory_hash)
);

CREATE INDEX IF NOT EXISTS idx_session_sent_at ON session_sent(session_id, sent_at);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// V3: Causal edges from corrections, citation recency, composite FSRS index
const MIGRATION_V3_UP: &str = r#"
-- Causal edges emitted by the corrections ledger when relations are enabled
CREATE TABLE IF NOT EXISTS memory_edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    target_id INTEGER NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    edge_type TEXT NOT NULL,
    correction_id INTEGER,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_edges_source ON memory_edges(source_id);
CREATE INDEX IF NOT EXISTS idx_edges_target ON memory_edges(target_id);

-- Citation recency feeds the composite scorer (epoch millis)
ALTER TABLE memories ADD COLUMN last_cited INTEGER;

-- Composite index for FSRS-driven retrieval sweeps
CREATE INDEX IF NOT EXISTS idx_memories_review_stability ON memories(last_review, stability);

UPDATE schema_version SET version = 3, applied_at = datetime('now');
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );

            // execute_batch handles multi-statement SQL including triggers
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn migrations_are_ordered_and_monotonic() {
        let mut prev = 0;
        for m in MIGRATIONS {
            assert!(m.version > prev);
            prev = m.version;
        }
    }

    #[test]
    fn apply_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let first = apply_migrations(&conn).unwrap();
        assert_eq!(first as usize, MIGRATIONS.len());
        let second = apply_migrations(&conn).unwrap();
        assert_eq!(second, 0);
        assert_eq!(
            get_current_version(&conn).unwrap(),
            MIGRATIONS.last().unwrap().version
        );
    }

    #[test]
    fn rerun_preserves_custom_fsrs_state() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO memories (spec_folder, file_path, anchor_id, content, stability, difficulty, created_at, updated_at)
             VALUES ('s', 'f.md', 'a', 'body', 42.5, 7.25, datetime('now'), datetime('now'))",
            [],
        )
        .unwrap();

        apply_migrations(&conn).unwrap();

        let (s, d): (f64, f64) = conn
            .query_row("SELECT stability, difficulty FROM memories", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(s, 42.5);
        assert_eq!(d, 7.25);
    }

    #[test]
    fn correction_type_check_rejects_unknown_values() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO memories (spec_folder, file_path, anchor_id, content, created_at, updated_at)
             VALUES ('s', 'f.md', 'a', 'body', datetime('now'), datetime('now'))",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO corrections (original_memory_id, correction_type, original_stability_before, original_stability_after, created_at)
             VALUES (1, 'vaporized', 1.0, 0.5, datetime('now'))",
            [],
        );
        assert!(result.is_err());
    }
}
