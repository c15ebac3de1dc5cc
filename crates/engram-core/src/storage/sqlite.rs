//! SQLite store
//!
//! Single-writer storage with separate reader/writer connections, WAL
//! journaling, and in-memory search indexes (vector + BM25) mirrored from
//! the committed rows. Every write that touches multiple tables runs in one
//! transaction; readers observe the last committed state only.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use lru::LruCache;
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::EngineConfig;
use crate::embeddings::{Embedding, EmbeddingError, EmbeddingService};
use crate::error::{EngineError, Result};
use crate::fsrs::{self, MAX_DIFFICULTY, MAX_STABILITY, MIN_DIFFICULTY, MIN_STABILITY};
use crate::memory::{EmbeddingStatus, ImportanceTier, Memory, MemoryInput};
use crate::search::bm25::Bm25Index;
use crate::search::fusion::{reciprocal_rank_fusion, SearchSource, RRF_K};
use crate::search::fuzzy::{expand_query, ExpandOptions};
use crate::search::lexical::{combine_lexical, escape_fts_query, LexicalHit};
use crate::search::vector::VectorIndex;

const MEMORY_COLUMNS: &str = "id, spec_folder, file_path, anchor_id, title, trigger_phrases, \
     summary, content, content_hash, memory_type, importance_tier, importance_weight, \
     stability, difficulty, last_review, review_count, access_count, last_accessed, \
     last_cited, embedding_status, created_at, updated_at";

/// Query-embedding LRU capacity.
const QUERY_CACHE_SIZE: usize = 100;

// ============================================================================
// TYPES
// ============================================================================

/// A row from the append-only prediction-error conflict log.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub id: i64,
    pub new_content_hash: String,
    pub existing_memory_id: Option<i64>,
    pub similarity_score: f64,
    pub action: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate engine statistics.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub total_memories: i64,
    pub by_tier: HashMap<String, i64>,
    pub by_embedding_status: HashMap<String, i64>,
    pub avg_stability: f64,
    pub total_reviews: i64,
    pub conflicts: i64,
    pub corrections: i64,
    pub sessions: i64,
}

/// Options for [`Store::unified_search`].
#[derive(Debug, Clone)]
pub struct UnifiedSearchOptions {
    pub limit: usize,
    pub spec_folder: Option<String>,
    pub expand: ExpandOptions,
    /// Graph expansion contributes only when relations are enabled; an
    /// absent graph is an empty source, never an error.
    pub include_graph: bool,
}

impl Default for UnifiedSearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            spec_folder: None,
            expand: ExpandOptions::default(),
            include_graph: true,
        }
    }
}

/// A fused retrieval hit with its loaded memory.
#[derive(Debug, Clone)]
pub struct RetrievalHit {
    pub memory: Memory,
    pub rrf_score: f64,
    pub in_vector: bool,
    pub in_fts: bool,
    pub in_graph: bool,
    /// Cosine similarity from the vector source, when it contributed.
    pub similarity: Option<f32>,
}

// ============================================================================
// STORE
// ============================================================================

/// Durable memory store with integrated search indexes.
///
/// Interior mutability via per-resource mutexes keeps all methods `&self`,
/// so callers can share the store behind a plain `Arc`.
pub struct Store {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    vector: Mutex<VectorIndex>,
    bm25: Mutex<Bm25Index>,
    embeddings: EmbeddingService,
    config: EngineConfig,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl Store {
    /// Apply connection PRAGMAs.
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) the store at `db_path`, defaulting to the platform
    /// data directory. Runs migrations and mirrors committed rows into the
    /// in-memory indexes.
    pub fn open(
        db_path: Option<PathBuf>,
        config: EngineConfig,
        embeddings: EmbeddingService,
    ) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let dirs = ProjectDirs::from("dev", "speckit", "engram").ok_or_else(|| {
                    EngineError::Fatal("could not determine data directory".to_string())
                })?;
                std::fs::create_dir_all(dirs.data_dir())?;
                dirs.data_dir().join("engram.db")
            }
        };

        let writer_conn = Connection::open(&path)
            .map_err(|e| EngineError::Fatal(format!("storage unreadable: {e}")))?;
        Self::configure_connection(&writer_conn)?;

        let disk_version = super::migrations::get_current_version(&writer_conn)?;
        let latest = super::migrations::MIGRATIONS
            .last()
            .map(|m| m.version)
            .unwrap_or(0);
        if disk_version > latest {
            return Err(EngineError::Fatal(format!(
                "schema version {disk_version} is newer than supported {latest}"
            )));
        }
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)
            .map_err(|e| EngineError::Fatal(format!("storage unreadable: {e}")))?;
        Self::configure_connection(&reader_conn)?;

        if config.eager_warmup {
            embeddings.warmup();
        }

        let store = Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            vector: Mutex::new(VectorIndex::new()),
            bm25: Mutex::new(Bm25Index::new()),
            embeddings,
            config,
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_SIZE).expect("cache size is non-zero"),
            )),
        };

        store.load_indexes()?;
        Ok(store)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn embeddings(&self) -> &EmbeddingService {
        &self.embeddings
    }

    pub(crate) fn writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| EngineError::Fatal("writer lock poisoned".to_string()))
    }

    pub(crate) fn reader(&self) -> Result<MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| EngineError::Fatal("reader lock poisoned".to_string()))
    }

    /// Mirror committed embeddings and content into the in-memory indexes.
    fn load_indexes(&self) -> Result<()> {
        let reader = self.reader()?;

        let mut stmt = reader.prepare(
            "SELECT e.memory_id, e.embedding, e.model, m.spec_folder
             FROM memory_embeddings e JOIN memories m ON m.id = e.memory_id",
        )?;
        let rows: Vec<(i64, Vec<u8>, String, String)> = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        let mut docs_stmt =
            reader.prepare("SELECT id, content, spec_folder FROM memories")?;
        let docs: Vec<(i64, String, String)> = docs_stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .filter_map(|r| r.ok())
            .collect();
        drop(docs_stmt);
        drop(reader);

        let mut vector = self.vector_index()?;
        for (id, bytes, model, folder) in rows {
            if let Some(embedding) = Embedding::from_bytes(&bytes, &model) {
                if let Err(e) = vector.insert(id, embedding.vector, &folder) {
                    tracing::warn!("skipping embedding for memory {id}: {e}");
                }
            }
        }
        drop(vector);

        let mut bm25 = self.bm25_index()?;
        for (id, content, folder) in docs {
            bm25.insert(id, &content, &folder);
        }

        Ok(())
    }

    fn vector_index(&self) -> Result<MutexGuard<'_, VectorIndex>> {
        self.vector
            .lock()
            .map_err(|_| EngineError::Fatal("vector index lock poisoned".to_string()))
    }

    fn bm25_index(&self) -> Result<MutexGuard<'_, Bm25Index>> {
        self.bm25
            .lock()
            .map_err(|_| EngineError::Fatal("bm25 index lock poisoned".to_string()))
    }

    // ========================================================================
    // MEMORY CRUD
    // ========================================================================

    /// Insert a new memory, embedding it when the provider is available.
    ///
    /// The natural key `(spec_folder, file_path, anchor_id)` is unique;
    /// violations surface as integrity errors.
    pub fn insert_memory(&self, input: &MemoryInput) -> Result<Memory> {
        if input.content.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "memory content cannot be empty".to_string(),
            ));
        }

        // Suspension point: provider call happens outside the write lock.
        let (embedding, status) = match self.embeddings.embed(&input.content) {
            Ok(vector) => (Some(vector), EmbeddingStatus::Success),
            Err(EmbeddingError::Unavailable(_)) => (None, EmbeddingStatus::Pending),
            Err(e) => {
                tracing::warn!("embedding failed, memory stays lexical-only: {e}");
                (None, EmbeddingStatus::Failed)
            }
        };

        let id = {
            let mut writer = self.writer()?;
            let tx = writer.transaction()?;
            let id = Self::insert_memory_in(&tx, input, embedding.as_deref(), status)?;
            tx.commit()?;
            id
        };

        self.index_memory(id, &input.content, &input.spec_folder, embedding);

        self.get_memory(id)?
            .ok_or_else(|| EngineError::NotFound(format!("memory {id}")))
    }

    /// Insert within an existing transaction. Does not touch the in-memory
    /// indexes; callers do that after commit via [`Store::index_memory`].
    pub(crate) fn insert_memory_in(
        conn: &Connection,
        input: &MemoryInput,
        embedding: Option<&[f32]>,
        status: EmbeddingStatus,
    ) -> Result<i64> {
        let now = Utc::now();
        let (stability, difficulty) = input.initial_fsrs();
        let trigger_json =
            serde_json::to_string(&input.trigger_phrases).unwrap_or_else(|_| "[]".to_string());

        conn.execute(
            "INSERT INTO memories (
                spec_folder, file_path, anchor_id, title, trigger_phrases, summary,
                content, content_hash, memory_type, importance_tier, importance_weight,
                stability, difficulty, review_count, access_count,
                embedding_status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 0, 0, ?14, ?15, ?16)",
            params![
                input.spec_folder,
                input.file_path,
                input.anchor_id,
                input.title,
                trigger_json,
                input.summary,
                input.content,
                input.content_hash,
                input.memory_type,
                input.importance_tier.as_str(),
                input.importance_weight.clamp(0.0, 1.0),
                stability.clamp(MIN_STABILITY, MAX_STABILITY),
                difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY),
                status.as_str(),
                now,
                now,
            ],
        )
        .map_err(integrity_or_db)?;

        let id = conn.last_insert_rowid();

        if let Some(vector) = embedding {
            let blob = Embedding {
                vector: vector.to_vec(),
                dimensions: vector.len(),
                model: "external".to_string(),
            };
            conn.execute(
                "INSERT INTO memory_embeddings (memory_id, embedding, dimensions, model, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, blob.to_bytes(), vector.len() as i64, blob.model, now],
            )?;
        }

        Ok(id)
    }

    /// Update the in-memory indexes after a committed insert/update.
    pub(crate) fn index_memory(
        &self,
        id: i64,
        content: &str,
        spec_folder: &str,
        embedding: Option<Vec<f32>>,
    ) {
        if let Ok(mut bm25) = self.bm25_index() {
            bm25.insert(id, content, spec_folder);
        }
        if let Some(vector) = embedding {
            if let Ok(mut index) = self.vector_index() {
                if let Err(e) = index.insert(id, vector, spec_folder) {
                    tracing::warn!("vector index insert failed for memory {id}: {e}");
                }
            }
        }
    }

    /// Remove a memory's vector from the in-memory index.
    pub(crate) fn drop_vector(&self, id: i64) {
        if let Ok(mut index) = self.vector_index() {
            index.delete(id);
        }
    }

    pub fn get_memory(&self, id: i64) -> Result<Option<Memory>> {
        let reader = self.reader()?;
        Self::memory_in(&reader, id)
    }

    pub(crate) fn memory_in(conn: &Connection, id: i64) -> Result<Option<Memory>> {
        conn.query_row(
            &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
            params![id],
            Self::row_to_memory,
        )
        .optional()
        .map_err(EngineError::from)
    }

    /// Look up by natural key.
    pub fn get_memory_by_key(
        &self,
        spec_folder: &str,
        file_path: &str,
        anchor_id: &str,
    ) -> Result<Option<Memory>> {
        let reader = self.reader()?;
        reader
            .query_row(
                &format!(
                    "SELECT {MEMORY_COLUMNS} FROM memories
                     WHERE spec_folder = ?1 AND file_path = ?2 AND anchor_id = ?3"
                ),
                params![spec_folder, file_path, anchor_id],
                Self::row_to_memory,
            )
            .optional()
            .map_err(EngineError::from)
    }

    /// Replace the canonical content of a memory, re-deriving every index
    /// view in the same committed write.
    pub fn update_memory_content(
        &self,
        id: i64,
        content: &str,
        content_hash: Option<&str>,
    ) -> Result<Memory> {
        if content.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "memory content cannot be empty".to_string(),
            ));
        }

        let existing = self
            .get_memory(id)?
            .ok_or_else(|| EngineError::NotFound(format!("memory {id}")))?;

        let (embedding, status) = match self.embeddings.embed(content) {
            Ok(vector) => (Some(vector), EmbeddingStatus::Success),
            Err(EmbeddingError::Unavailable(_)) => (None, EmbeddingStatus::Pending),
            Err(_) => (None, EmbeddingStatus::Failed),
        };

        {
            let mut writer = self.writer()?;
            let tx = writer.transaction()?;
            let now = Utc::now();
            tx.execute(
                "UPDATE memories SET content = ?1, content_hash = ?2,
                     embedding_status = ?3, updated_at = ?4 WHERE id = ?5",
                params![content, content_hash, status.as_str(), now, id],
            )?;
            match &embedding {
                Some(vector) => {
                    let blob = Embedding {
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
                        params![id, blob.to_bytes(), vector.len() as i64, blob.model, now],
                    )?;
                }
                None => {
                    tx.execute(
                        "DELETE FROM memory_embeddings WHERE memory_id = ?1",
                        params![id],
                    )?;
                }
            }
            tx.commit()?;
        }

        if embedding.is_none() {
            if let Ok(mut index) = self.vector_index() {
                index.delete(id);
            }
        }
        self.index_memory(id, content, &existing.spec_folder, embedding);

        self.get_memory(id)?
            .ok_or_else(|| EngineError::NotFound(format!("memory {id}")))
    }

    /// Delete a memory and its embedding (cascade). Returns whether a row
    /// was removed.
    pub fn delete_memory(&self, id: i64) -> Result<bool> {
        let deleted = {
            let writer = self.writer()?;
            writer.execute("DELETE FROM memories WHERE id = ?1", params![id])? > 0
        };
        if deleted {
            if let Ok(mut vector) = self.vector_index() {
                vector.delete(id);
            }
            if let Ok(mut bm25) = self.bm25_index() {
                bm25.remove(id);
            }
        }
        Ok(deleted)
    }

    // ========================================================================
    // FSRS SIDE EFFECTS
    // ========================================================================

    /// Testing effect: strengthen a memory because it was retrieved.
    ///
    /// Computes retrievability at access time, applies the Good-grade
    /// stability update with the desirable-difficulty bonus, increments the
    /// review count, and stamps both review and access times in one
    /// transaction.
    pub fn strengthen_on_access(&self, id: i64) -> Result<Memory> {
        let mut writer = self.writer()?;
        let tx = writer.transaction()?;
        let memory = Self::strengthen_in(&tx, id, Utc::now())?;
        tx.commit()?;
        Ok(memory)
    }

    pub(crate) fn strengthen_in(
        conn: &Connection,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<Memory> {
        let memory = Self::memory_in(conn, id)?
            .ok_or_else(|| EngineError::NotFound(format!("memory {id}")))?;

        let r = memory
            .days_since_review(now)
            .map(|days| fsrs::retrievability(memory.stability, days))
            .unwrap_or(0.9);
        let new_stability = fsrs::access_stability(memory.stability, memory.difficulty, r);

        conn.execute(
            "UPDATE memories SET
                stability = ?1,
                review_count = review_count + 1,
                access_count = access_count + 1,
                last_review = ?2,
                last_accessed = ?3,
                updated_at = ?2
             WHERE id = ?4",
            params![new_stability, now, now.timestamp_millis(), id],
        )?;

        Self::memory_in(conn, id)?
            .ok_or_else(|| EngineError::NotFound(format!("memory {id}")))
    }

    /// Stamp a citation (the memory was referenced in produced output).
    pub fn mark_cited(&self, id: i64) -> Result<()> {
        let writer = self.writer()?;
        let changed = writer.execute(
            "UPDATE memories SET last_cited = ?1 WHERE id = ?2",
            params![Utc::now().timestamp_millis(), id],
        )?;
        if changed == 0 {
            return Err(EngineError::NotFound(format!("memory {id}")));
        }
        Ok(())
    }

    // ========================================================================
    // SEARCH
    // ========================================================================

    /// FTS5 search. Tolerates any input string; operator characters are
    /// escaped before matching. Returns `(id, score)` with higher-better
    /// scores.
    pub fn fts_search(
        &self,
        query: &str,
        limit: usize,
        spec_folder: Option<&str>,
    ) -> Result<Vec<(i64, f64)>> {
        let escaped = escape_fts_query(query);
        if escaped.is_empty() {
            return Ok(vec![]);
        }

        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT m.id, -bm25(memories_fts) AS score
             FROM memories_fts f JOIN memories m ON m.id = f.rowid
             WHERE memories_fts MATCH ?1
               AND (?2 IS NULL OR m.spec_folder = ?2)
             ORDER BY score DESC, m.id ASC
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![escaped, spec_folder, limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<(i64, f64)>>>()?;
        Ok(rows)
    }

    /// Merged FTS5 + BM25 lexical search with per-source tagging.
    pub fn combined_lexical_search(
        &self,
        query: &str,
        limit: usize,
        spec_folder: Option<&str>,
    ) -> Result<Vec<LexicalHit>> {
        let fts = self.fts_search(query, limit, spec_folder)?;
        let bm25 = self.bm25_index()?.search(query, limit, spec_folder);
        let mut hits = combine_lexical(&fts, &bm25);
        hits.truncate(limit);
        Ok(hits)
    }

    /// Vector nearest-neighbor search over the mirrored index.
    pub fn vector_search(
        &self,
        query: &[f32],
        k: usize,
        spec_folder: Option<&str>,
    ) -> Result<Vec<crate::search::vector::VectorHit>> {
        Ok(self.vector_index()?.search(query, k, spec_folder))
    }

    /// Multi-concept vector search (2 to 5 query vectors, max-similarity
    /// aggregation).
    pub fn multi_concept_search(
        &self,
        queries: &[Vec<f32>],
        k: usize,
        spec_folder: Option<&str>,
    ) -> Result<Vec<crate::search::vector::VectorHit>> {
        self.vector_index()?
            .multi_concept_search(queries, k, spec_folder)
            .map_err(|e| EngineError::InvalidInput(e.to_string()))
    }

    /// Embed a query, caching per query text. Degrades to `None` when the
    /// provider is unavailable.
    pub fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(cached) = cache.get(query) {
                return Some(cached.clone());
            }
        }
        match self.embeddings.embed(query) {
            Ok(vector) => {
                if let Ok(mut cache) = self.query_cache.lock() {
                    cache.put(query.to_string(), vector.clone());
                }
                Some(vector)
            }
            Err(e) => {
                tracing::debug!("query embedding unavailable, lexical-only path: {e}");
                None
            }
        }
    }

    /// Hybrid retrieval: vector + FTS5 + BM25 (+ graph) fused with RRF.
    ///
    /// Query expansion rewrites the lexical query; the original text is
    /// embedded for the vector source. Each index applies the spec-folder
    /// predicate before its own limit.
    pub fn unified_search(
        &self,
        query: &str,
        opts: &UnifiedSearchOptions,
    ) -> Result<Vec<RetrievalHit>> {
        if query.trim().is_empty() {
            return Ok(vec![]);
        }
        let folder = opts.spec_folder.as_deref();
        let source_limit = opts.limit.max(1) * 2;

        let expansion = expand_query(query, &opts.expand);

        let mut similarity: HashMap<i64, f32> = HashMap::new();
        let mut lists: Vec<(SearchSource, Vec<i64>)> = Vec::new();

        if let Some(query_vec) = self.embed_query(query) {
            let hits = self.vector_search(&query_vec, source_limit, folder)?;
            for hit in &hits {
                similarity.insert(hit.id, hit.similarity);
            }
            lists.push((
                SearchSource::Vector,
                hits.into_iter().map(|h| h.id).collect(),
            ));
        }

        let fts_ids: Vec<i64> = self
            .fts_search(&expansion.expanded, source_limit, folder)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        lists.push((SearchSource::Fts, fts_ids));

        let bm25_ids: Vec<i64> = self
            .bm25_index()?
            .search(&expansion.expanded, source_limit, folder)
            .into_iter()
            .map(|h| h.id)
            .collect();
        lists.push((SearchSource::Bm25, bm25_ids));

        if opts.include_graph && self.config.relations_enabled {
            let seeds: Vec<i64> = lists
                .iter()
                .find(|(s, _)| *s == SearchSource::Vector)
                .map(|(_, ids)| ids.iter().take(3).copied().collect())
                .unwrap_or_default();
            let neighbors = self.graph_neighbors(&seeds)?;
            lists.push((SearchSource::Graph, neighbors));
        }

        let fused = reciprocal_rank_fusion(&lists, RRF_K);

        let mut hits = Vec::with_capacity(opts.limit);
        for fh in fused.into_iter().take(opts.limit) {
            if let Some(memory) = self.get_memory(fh.id)? {
                hits.push(RetrievalHit {
                    similarity: similarity.get(&fh.id).copied(),
                    rrf_score: fh.rrf_score,
                    in_vector: fh.in_vector,
                    in_fts: fh.in_fts,
                    in_graph: fh.in_graph,
                    memory,
                });
            }
        }
        Ok(hits)
    }

    /// Memories whose trigger phrases occur verbatim in the input.
    pub fn trigger_match(
        &self,
        input: &str,
        spec_folder: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        let input_lower = input.to_lowercase();
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories
             WHERE trigger_phrases != '[]'
               AND (?1 IS NULL OR spec_folder = ?1)
             ORDER BY id ASC"
        ))?;
        let rows = stmt
            .query_map(params![spec_folder], Self::row_to_memory)?
            .collect::<rusqlite::Result<Vec<Memory>>>()?;
        drop(stmt);
        drop(reader);

        let mut matched: Vec<Memory> = rows
            .into_iter()
            .filter(|m| {
                m.trigger_phrases
                    .iter()
                    .any(|p| !p.is_empty() && input_lower.contains(&p.to_lowercase()))
            })
            .collect();
        matched.truncate(limit);
        Ok(matched)
    }

    /// Outgoing causal neighbors of the seed set, deduplicated, seeds
    /// excluded.
    pub(crate) fn graph_neighbors(&self, seeds: &[i64]) -> Result<Vec<i64>> {
        if seeds.is_empty() {
            return Ok(vec![]);
        }
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT target_id FROM memory_edges WHERE source_id = ?1
             UNION
             SELECT source_id FROM memory_edges WHERE target_id = ?1
             ORDER BY 1 ASC",
        )?;

        let seed_set: HashSet<i64> = seeds.iter().copied().collect();
        let mut out: Vec<i64> = Vec::new();
        let mut seen: HashSet<i64> = HashSet::new();
        for &seed in seeds {
            let neighbors = stmt
                .query_map(params![seed], |row| row.get::<_, i64>(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            for n in neighbors {
                if !seed_set.contains(&n) && seen.insert(n) {
                    out.push(n);
                }
            }
        }
        Ok(out)
    }

    // ========================================================================
    // CONFLICT LOG
    // ========================================================================

    pub(crate) fn log_conflict_in(
        conn: &Connection,
        new_content_hash: &str,
        existing_memory_id: Option<i64>,
        similarity: f64,
        action: &str,
        notes: Option<&str>,
    ) -> Result<i64> {
        conn.execute(
            "INSERT INTO conflicts (new_content_hash, existing_memory_id, similarity_score, action, notes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new_content_hash,
                existing_memory_id,
                similarity,
                action,
                notes,
                Utc::now(),
            ],
        )
        .map_err(integrity_or_db)?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent conflict rows, newest first.
    pub fn conflicts(&self, limit: usize) -> Result<Vec<ConflictRecord>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, new_content_hash, existing_memory_id, similarity_score, action, notes, created_at
             FROM conflicts ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(ConflictRecord {
                    id: row.get(0)?,
                    new_content_hash: row.get(1)?,
                    existing_memory_id: row.get(2)?,
                    similarity_score: row.get(3)?,
                    action: row.get(4)?,
                    notes: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<ConflictRecord>>>()?;
        Ok(rows)
    }

    /// Drop conflict rows older than `before`; bounds the append-only log.
    pub fn prune_conflicts(&self, before: DateTime<Utc>) -> Result<usize> {
        let writer = self.writer()?;
        let removed = writer.execute(
            "DELETE FROM conflicts WHERE created_at < ?1",
            params![before],
        )?;
        Ok(removed)
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Aggregate statistics across all tables.
    pub fn stats(&self) -> Result<EngineStats> {
        let reader = self.reader()?;

        let total_memories: i64 =
            reader.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?;
        let avg_stability: f64 = reader.query_row(
            "SELECT COALESCE(AVG(stability), 0.0) FROM memories",
            [],
            |r| r.get(0),
        )?;
        let total_reviews: i64 = reader.query_row(
            "SELECT COALESCE(SUM(review_count), 0) FROM memories",
            [],
            |r| r.get(0),
        )?;
        let conflicts: i64 =
            reader.query_row("SELECT COUNT(*) FROM conflicts", [], |r| r.get(0))?;
        let corrections: i64 =
            reader.query_row("SELECT COUNT(*) FROM corrections", [], |r| r.get(0))?;
        let sessions: i64 =
            reader.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))?;

        let mut by_tier = HashMap::new();
        let mut stmt =
            reader.prepare("SELECT importance_tier, COUNT(*) FROM memories GROUP BY 1")?;
        for row in stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))? {
            let (tier, count) = row?;
            by_tier.insert(tier, count);
        }
        drop(stmt);

        let mut by_embedding_status = HashMap::new();
        let mut stmt =
            reader.prepare("SELECT embedding_status, COUNT(*) FROM memories GROUP BY 1")?;
        for row in stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))? {
            let (status, count) = row?;
            by_embedding_status.insert(status, count);
        }

        Ok(EngineStats {
            total_memories,
            by_tier,
            by_embedding_status,
            avg_stability,
            total_reviews,
            conflicts,
            corrections,
            sessions,
        })
    }

    /// Memories most overdue for a refresh, by FSRS optimal interval.
    pub fn review_queue(&self, limit: usize) -> Result<Vec<Memory>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories
             WHERE last_review IS NOT NULL
             ORDER BY last_review ASC LIMIT 500"
        ))?;
        let rows = stmt
            .query_map([], Self::row_to_memory)?
            .collect::<rusqlite::Result<Vec<Memory>>>()?;
        drop(stmt);
        drop(reader);

        let now = Utc::now();
        let mut overdue: Vec<(f64, Memory)> = rows
            .into_iter()
            .filter_map(|m| {
                let days = m.days_since_review(now)?;
                let due = fsrs::optimal_interval(m.stability, 0.9);
                let lateness = days - due;
                (lateness > 0.0).then_some((lateness, m))
            })
            .collect();
        overdue.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(overdue.into_iter().take(limit).map(|(_, m)| m).collect())
    }

    /// Decay sweep: demote `temporary` memories whose retrievability fell
    /// below 0.1 to `deprecated`. Returns the number demoted.
    pub fn apply_decay(&self) -> Result<usize> {
        let candidates: Vec<(i64, f64, Option<DateTime<Utc>>)> = {
            let reader = self.reader()?;
            let mut stmt = reader.prepare(
                "SELECT id, stability, last_review FROM memories WHERE importance_tier = 'temporary'",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let now = Utc::now();
        let stale: Vec<i64> = candidates
            .into_iter()
            .filter(|(_, stability, last_review)| {
                let days = match last_review {
                    Some(lr) => (now - *lr).num_milliseconds() as f64 / 86_400_000.0,
                    None => return false,
                };
                fsrs::retrievability(*stability, days) < 0.1
            })
            .map(|(id, _, _)| id)
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }

        let mut writer = self.writer()?;
        let tx = writer.transaction()?;
        for id in &stale {
            tx.execute(
                "UPDATE memories SET importance_tier = 'deprecated', updated_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
        }
        tx.commit()?;
        tracing::info!("decay sweep demoted {} temporary memories", stale.len());
        Ok(stale.len())
    }

    /// Online backup via `VACUUM INTO`.
    pub fn backup_to(&self, path: &Path) -> Result<()> {
        let dest = path
            .to_str()
            .ok_or_else(|| EngineError::InvalidInput("non-UTF8 backup path".to_string()))?;
        let reader = self.reader()?;
        reader.execute("VACUUM INTO ?1", params![dest])?;
        Ok(())
    }

    // ========================================================================
    // ROW MAPPING
    // ========================================================================

    pub(crate) fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
        let trigger_json: String = row.get(5)?;
        let tier: String = row.get(10)?;
        let status: String = row.get(19)?;
        Ok(Memory {
            id: row.get(0)?,
            spec_folder: row.get(1)?,
            file_path: row.get(2)?,
            anchor_id: row.get(3)?,
            title: row.get(4)?,
            trigger_phrases: serde_json::from_str(&trigger_json).unwrap_or_default(),
            summary: row.get(6)?,
            content: row.get(7)?,
            content_hash: row.get(8)?,
            memory_type: row.get(9)?,
            importance_tier: ImportanceTier::parse_name(&tier),
            importance_weight: row.get(11)?,
            stability: row.get(12)?,
            difficulty: row.get(13)?,
            last_review: row.get(14)?,
            review_count: row.get(15)?,
            access_count: row.get(16)?,
            last_accessed: row.get(17)?,
            last_cited: row.get(18)?,
            embedding_status: EmbeddingStatus::parse_name(&status),
            created_at: row.get(20)?,
            updated_at: row.get(21)?,
        })
    }
}

/// Map CHECK/FK violations to integrity errors, everything else to database
/// errors.
fn integrity_or_db(e: rusqlite::Error) -> EngineError {
    match &e {
        rusqlite::Error::SqliteFailure(code, message)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            EngineError::Integrity(
                message
                    .clone()
                    .unwrap_or_else(|| "constraint violation".to_string()),
            )
        }
        _ => EngineError::Database(e),
    }
}

// ============================================================================
// TESTS
// ============================================================================
