//! Cross-encoder reranking
//!
//! Optional second retrieval stage: reorder the fused top-K by true
//! query-document relevance. Hosted providers (Voyage, Cohere) are tried
//! according to `CROSS_ENCODER_PROVIDER`, falling back to a local
//! term-overlap scorer. Every failure path degrades to the fused ordering;
//! reranking never blocks or fails a search.
//!
//! A per-session P95 latency circuit breaker disables reranking for the
//! rest of the session once the provider proves too slow.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::EngineConfig;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Hard ceiling on documents sent to a provider per call.
pub const MAX_RERANK_CANDIDATES: usize = 20;

/// Session P95 latency above this disables reranking.
pub const P95_LATENCY_THRESHOLD_MS: f64 = 500.0;

/// Cache entry time-to-live.
pub const CACHE_TTL_MS: u64 = 300_000;

/// Cache capacity; exceeding it evicts the oldest tenth.
pub const CACHE_MAX_ENTRIES: usize = 1000;

/// Content length (chars) at which the length penalty reaches 1.0.
pub const LENGTH_PENALTY_THRESHOLD: usize = 100;

/// Length penalty floor for empty content.
pub const LENGTH_PENALTY_MIN: f64 = 0.8;

/// Timeout for hosted providers.
pub const HOSTED_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the local scorer.
pub const LOCAL_TIMEOUT: Duration = Duration::from_secs(5);

const VOYAGE_ENDPOINT: &str = "https://api.voyageai.com/v1/rerank";
const VOYAGE_MODEL: &str = "rerank-2";
const VOYAGE_MAX_DOCUMENTS: usize = 1000;

const COHERE_ENDPOINT: &str = "https://api.cohere.com/v2/rerank";
const COHERE_MODEL: &str = "rerank-english-v3.0";
const COHERE_MAX_DOCUMENTS: usize = 1000;

const LOCAL_MODEL: &str = "term-overlap";
const LOCAL_MAX_DOCUMENTS: usize = 100;

// ============================================================================
// TYPES
// ============================================================================

/// Provider preference. `Auto` resolves voyage → cohere → local by key
/// availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RerankProvider {
    #[default]
    Auto,
    Voyage,
    Cohere,
    Local,
}

impl RerankProvider {
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "voyage" => RerankProvider::Voyage,
            "cohere" => RerankProvider::Cohere,
            "local" => RerankProvider::Local,
            _ => RerankProvider::Auto,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RerankProvider::Auto => "auto",
            RerankProvider::Voyage => "voyage",
            RerankProvider::Cohere => "cohere",
            RerankProvider::Local => "local",
        }
    }
}

/// A document entering the rerank stage.
#[derive(Debug, Clone)]
pub struct RerankCandidate {
    pub id: i64,
    pub content: String,
}

/// A reranked document with its final relevance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RerankedDoc {
    pub id: i64,
    pub relevance: f64,
}

/// Metadata describing what the rerank stage actually did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RerankMetadata {
    pub reranking_applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    pub session_disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_reason: Option<String>,
}

impl RerankMetadata {
    fn passthrough() -> Self {
        Self {
            reranking_applied: false,
            provider: None,
            model: None,
            cache_hit: false,
            latency_ms: None,
            session_disabled: false,
            disable_reason: None,
        }
    }
}

/// Rerank stage output: documents in final order plus stage metadata.
#[derive(Debug, Clone)]
pub struct RerankOutcome {
    pub results: Vec<RerankedDoc>,
    pub metadata: RerankMetadata,
}

/// Options for a single rerank call.
#[derive(Debug, Clone)]
pub struct RerankOptions {
    /// Bound on returned documents.
    pub top_k: Option<usize>,
    /// Documents forwarded to the provider (capped at
    /// [`MAX_RERANK_CANDIDATES`]).
    pub max_candidates: usize,
    /// `false` short-circuits to the fused order.
    pub rerank: bool,
}

impl Default for RerankOptions {
    fn default() -> Self {
        Self {
            top_k: None,
            max_candidates: MAX_RERANK_CANDIDATES,
            rerank: true,
        }
    }
}

struct CacheEntry {
    results: Vec<RerankedDoc>,
    inserted: Instant,
}

enum Backend {
    Voyage { api_key: String },
    Cohere { api_key: String },
    Local,
    /// Test backend: local scoring with a fixed reported latency.
    Simulated,
}

impl Backend {
    fn name(&self) -> &'static str {
        match self {
            Backend::Voyage { .. } => "voyage",
            Backend::Cohere { .. } => "cohere",
            Backend::Local => "local",
            Backend::Simulated => "simulated",
        }
    }

    fn model(&self) -> &'static str {
        match self {
            Backend::Voyage { .. } => VOYAGE_MODEL,
            Backend::Cohere { .. } => COHERE_MODEL,
            Backend::Local | Backend::Simulated => LOCAL_MODEL,
        }
    }

    fn max_documents(&self) -> usize {
        match self {
            Backend::Voyage { .. } => VOYAGE_MAX_DOCUMENTS,
            Backend::Cohere { .. } => COHERE_MAX_DOCUMENTS,
            Backend::Local | Backend::Simulated => LOCAL_MAX_DOCUMENTS,
        }
    }

    fn timeout(&self) -> Duration {
        match self {
            Backend::Voyage { .. } | Backend::Cohere { .. } => HOSTED_TIMEOUT,
            Backend::Local | Backend::Simulated => LOCAL_TIMEOUT,
        }
    }
}

// ============================================================================
// RERANKER
// ============================================================================

/// Session-scoped cross-encoder reranker with caching and a latency
/// circuit breaker.
pub struct CrossEncoderReranker {
    enabled: bool,
    preference: RerankProvider,
    voyage_api_key: Option<String>,
    cohere_api_key: Option<String>,
    http: reqwest::Client,
    cache: Mutex<HashMap<String, CacheEntry>>,
    latencies_ms: Mutex<Vec<f64>>,
    disable_reason: Mutex<Option<String>>,
    simulated_latency_ms: Option<f64>,
}

impl CrossEncoderReranker {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            enabled: config.cross_encoder_enabled,
            preference: config.cross_encoder_provider,
            voyage_api_key: config.voyage_api_key.clone(),
            cohere_api_key: config.cohere_api_key.clone(),
            http: reqwest::Client::new(),
            cache: Mutex::new(HashMap::new()),
            latencies_ms: Mutex::new(Vec::new()),
            disable_reason: Mutex::new(None),
            simulated_latency_ms: None,
        }
    }

    /// Enabled reranker with a backend that reports a fixed latency.
    /// Used by circuit-breaker tests; the scoring itself is the local path.
    #[doc(hidden)]
    pub fn simulated(latency_ms: f64) -> Self {
        let mut config = EngineConfig::default();
        config.cross_encoder_enabled = true;
        config.cross_encoder_provider = RerankProvider::Local;
        let mut reranker = Self::from_config(&config);
        reranker.simulated_latency_ms = Some(latency_ms);
        reranker
    }

    /// Clear the session circuit breaker and latency history.
    pub fn reset_session(&self) {
        if let Ok(mut reason) = self.disable_reason.lock() {
            *reason = None;
        }
        if let Ok(mut latencies) = self.latencies_ms.lock() {
            latencies.clear();
        }
    }

    /// Session P95 latency over the calls made so far.
    pub fn p95_latency_ms(&self) -> Option<f64> {
        let latencies = self.latencies_ms.lock().ok()?;
        p95(&latencies)
    }

    /// Reorder `candidates` by query relevance. Never errors: every failure
    /// degrades to the input (fused) order with `reranking_applied=false`.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
        opts: &RerankOptions,
    ) -> RerankOutcome {
        let top_k = opts.top_k.unwrap_or(candidates.len());

        if !self.enabled || !opts.rerank || candidates.len() <= 1 {
            return passthrough(candidates, top_k, RerankMetadata::passthrough());
        }

        if let Some(reason) = self.disable_reason.lock().ok().and_then(|r| r.clone()) {
            let mut meta = RerankMetadata::passthrough();
            meta.session_disabled = true;
            meta.disable_reason = Some(reason);
            return passthrough(candidates, top_k, meta);
        }

        let limit = opts.max_candidates.min(MAX_RERANK_CANDIDATES).max(1);
        let window = &candidates[..candidates.len().min(limit)];

        let key = cache_key(query, window);
        if let Some(cached) = self.cache_get(&key) {
            let mut results = cached;
            results.truncate(top_k);
            return RerankOutcome {
                results,
                metadata: RerankMetadata {
                    reranking_applied: true,
                    provider: None,
                    model: None,
                    cache_hit: true,
                    latency_ms: None,
                    session_disabled: false,
                    disable_reason: None,
                },
            };
        }

        let backend = self.resolve_backend();
        let window = &window[..window.len().min(backend.max_documents())];

        let started = Instant::now();
        let scores = tokio::time::timeout(backend.timeout(), self.score(&backend, query, window))
            .await
            .unwrap_or_else(|_| Err("provider timed out".to_string()));
        let latency_ms = self
            .simulated_latency_ms
            .unwrap_or_else(|| started.elapsed().as_secs_f64() * 1000.0);

        self.record_latency(latency_ms);

        match scores {
            Ok(scores) => {
                let mut results: Vec<RerankedDoc> = window
                    .iter()
                    .zip(scores)
                    .map(|(c, score)| RerankedDoc {
                        id: c.id,
                        relevance: score * length_penalty(&c.content),
                    })
                    .collect();
                results.sort_by(|a, b| {
                    b.relevance
                        .partial_cmp(&a.relevance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.id.cmp(&b.id))
                });

                self.cache_put(key, results.clone());
                results.truncate(top_k);

                RerankOutcome {
                    results,
                    metadata: RerankMetadata {
                        reranking_applied: true,
                        provider: Some(backend.name().to_string()),
                        model: Some(backend.model().to_string()),
                        cache_hit: false,
                        latency_ms: Some(latency_ms),
                        session_disabled: false,
                        disable_reason: None,
                    },
                }
            }
            Err(error) => {
                tracing::warn!(provider = backend.name(), "rerank failed, using fused order: {error}");
                let mut meta = RerankMetadata::passthrough();
                meta.provider = Some(backend.name().to_string());
                meta.latency_ms = Some(latency_ms);
                passthrough(candidates, top_k, meta)
            }
        }
    }

    fn resolve_backend(&self) -> Backend {
        if self.simulated_latency_ms.is_some() {
            return Backend::Simulated;
        }
        match self.preference {
            RerankProvider::Voyage => match &self.voyage_api_key {
                Some(key) => Backend::Voyage { api_key: key.clone() },
                None => Backend::Local,
            },
            RerankProvider::Cohere => match &self.cohere_api_key {
                Some(key) => Backend::Cohere { api_key: key.clone() },
                None => Backend::Local,
            },
            RerankProvider::Local => Backend::Local,
            RerankProvider::Auto => {
                if let Some(key) = &self.voyage_api_key {
                    Backend::Voyage { api_key: key.clone() }
                } else if let Some(key) = &self.cohere_api_key {
                    Backend::Cohere { api_key: key.clone() }
                } else {
                    Backend::Local
                }
            }
        }
    }

    async fn score(
        &self,
        backend: &Backend,
        query: &str,
        window: &[RerankCandidate],
    ) -> Result<Vec<f64>, String> {
        match backend {
            Backend::Voyage { api_key } => self.score_voyage(api_key, query, window).await,
            Backend::Cohere { api_key } => self.score_cohere(api_key, query, window).await,
            Backend::Local | Backend::Simulated => {
                Ok(window
                    .iter()
                    .map(|c| term_overlap_score(query, &c.content))
                    .collect())
            }
        }
    }

    async fn score_voyage(
        &self,
        api_key: &str,
        query: &str,
        window: &[RerankCandidate],
    ) -> Result<Vec<f64>, String> {
        let documents: Vec<&str> = window.iter().map(|c| c.content.as_str()).collect();
        let body = serde_json::json!({
            "query": query,
            "documents": documents,
            "model": VOYAGE_MODEL,
        });

        let response = self
            .http
            .post(VOYAGE_ENDPOINT)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;

        let payload: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
        indexed_scores(&payload["data"], window.len())
    }

    async fn score_cohere(
        &self,
        api_key: &str,
        query: &str,
        window: &[RerankCandidate],
    ) -> Result<Vec<f64>, String> {
        let documents: Vec<&str> = window.iter().map(|c| c.content.as_str()).collect();
        let body = serde_json::json!({
            "query": query,
            "documents": documents,
            "model": COHERE_MODEL,
        });

        let response = self
            .http
            .post(COHERE_ENDPOINT)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;

        let payload: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
        indexed_scores(&payload["results"], window.len())
    }

    fn record_latency(&self, latency_ms: f64) {
        let Ok(mut latencies) = self.latencies_ms.lock() else {
            return;
        };
        latencies.push(latency_ms);

        if let Some(p95) = p95(&latencies) {
            if p95 > P95_LATENCY_THRESHOLD_MS {
                drop(latencies);
                let reason = format!(
                    "session P95 latency {p95:.0}ms exceeds {P95_LATENCY_THRESHOLD_MS:.0}ms"
                );
                tracing::warn!("reranker circuit breaker tripped: {reason}");
                if let Ok(mut slot) = self.disable_reason.lock() {
                    *slot = Some(reason);
                }
            }
        }
    }

    fn cache_get(&self, key: &str) -> Option<Vec<RerankedDoc>> {
        let mut cache = self.cache.lock().ok()?;
        let entry = cache.get(key)?;
        if entry.inserted.elapsed() > Duration::from_millis(CACHE_TTL_MS) {
            cache.remove(key);
            return None;
        }
        Some(entry.results.clone())
    }

    fn cache_put(&self, key: String, results: Vec<RerankedDoc>) {
        let Ok(mut cache) = self.cache.lock() else {
            return;
        };
        if cache.len() >= CACHE_MAX_ENTRIES {
            // Evict the oldest tenth.
            let mut by_age: Vec<(String, Instant)> = cache
                .iter()
                .map(|(k, e)| (k.clone(), e.inserted))
                .collect();
            by_age.sort_by_key(|(_, inserted)| *inserted);
            for (key, _) in by_age.iter().take(CACHE_MAX_ENTRIES / 10) {
                cache.remove(key);
            }
        }
        cache.insert(
            key,
            CacheEntry {
                results,
                inserted: Instant::now(),
            },
        );
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn passthrough(
    candidates: &[RerankCandidate],
    top_k: usize,
    metadata: RerankMetadata,
) -> RerankOutcome {
    let results = candidates
        .iter()
        .take(top_k)
        .map(|c| RerankedDoc {
            id: c.id,
            relevance: 0.0,
        })
        .collect();
    RerankOutcome { results, metadata }
}

/// Deterministic cache key: `sha256(query|sorted_doc_ids)` truncated to 16
/// hex chars.
pub fn cache_key(query: &str, candidates: &[RerankCandidate]) -> String {
    let mut ids: Vec<i64> = candidates.iter().map(|c| c.id).collect();
    ids.sort_unstable();
    let joined = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update(b"|");
    hasher.update(joined.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}

/// Length penalty: 1.0 at or above the threshold, 0.8 for empty content,
/// linear in between.
pub fn length_penalty(content: &str) -> f64 {
    let len = content.chars().count();
    if len >= LENGTH_PENALTY_THRESHOLD {
        return 1.0;
    }
    LENGTH_PENALTY_MIN
        + (1.0 - LENGTH_PENALTY_MIN) * len as f64 / LENGTH_PENALTY_THRESHOLD as f64
}

/// BM25-flavored term overlap, the local fallback scorer.
fn term_overlap_score(query: &str, document: &str) -> f64 {
    let query_lower = query.to_lowercase();
    let query_terms: Vec<&str> = query_lower.split_whitespace().collect();
    if query_terms.is_empty() {
        return 0.0;
    }
    let doc_lower = document.to_lowercase();
    let doc_len = document.len() as f64;
    if doc_len == 0.0 {
        return 0.0;
    }

    let k1 = 1.2;
    let b = 0.75;
    let avg_doc_len = 500.0;

    let mut score = 0.0;
    for term in &query_terms {
        let tf = doc_lower.matches(term).count() as f64;
        if tf > 0.0 {
            score += tf * (k1 + 1.0) / (tf + k1 * (1.0 - b + b * doc_len / avg_doc_len));
        }
    }
    score / query_terms.len() as f64
}

fn indexed_scores(items: &serde_json::Value, expected: usize) -> Result<Vec<f64>, String> {
    let items = items
        .as_array()
        .ok_or_else(|| "malformed provider response".to_string())?;
    let mut scores = vec![0.0f64; expected];
    for item in items {
        let index = item["index"]
            .as_u64()
            .ok_or_else(|| "missing index in provider response".to_string())?
            as usize;
        let score = item["relevance_score"]
            .as_f64()
            .ok_or_else(|| "missing relevance_score in provider response".to_string())?;
        if index < expected {
            scores[index] = score;
        }
    }
    Ok(scores)
}

fn p95(latencies: &[f64]) -> Option<f64> {
    if latencies.is_empty() {
        return None;
    }
    let mut sorted = latencies.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let index = ((sorted.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
    Some(sorted[index.min(sorted.len() - 1)])
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(n: usize) -> Vec<RerankCandidate> {
        (0..n as i64)
            .map(|id| RerankCandidate {
                id,
                content: format!("document {id} about memory engines and retrieval"),
            })
            .collect()
    }

    fn enabled_local() -> CrossEncoderReranker {
        let mut config = EngineConfig::default();
        config.cross_encoder_enabled = true;
        config.cross_encoder_provider = RerankProvider::Local;
        CrossEncoderReranker::from_config(&config)
    }

    #[test]
    fn cache_key_is_order_independent() {
        let a = vec![
            RerankCandidate { id: 3, content: String::new() },
            RerankCandidate { id: 1, content: String::new() },
        ];
        let b = vec![
            RerankCandidate { id: 1, content: String::new() },
            RerankCandidate { id: 3, content: String::new() },
        ];
        assert_eq!(cache_key("q", &a), cache_key("q", &b));
        assert_ne!(cache_key("q", &a), cache_key("other", &a));
        assert_eq!(cache_key("q", &a).len(), 16);
    }

    #[test]
    fn length_penalty_shape() {
        assert_eq!(length_penalty(""), 0.8);
        assert_eq!(length_penalty(&"x".repeat(100)), 1.0);
        assert_eq!(length_penalty(&"x".repeat(200)), 1.0);
        let half = length_penalty(&"x".repeat(50));
        assert!((half - 0.9).abs() < 1e-9);
    }

    #[test]
    fn provider_parse_defaults_to_auto() {
        assert_eq!(RerankProvider::parse_name("voyage"), RerankProvider::Voyage);
        assert_eq!(RerankProvider::parse_name("COHERE"), RerankProvider::Cohere);
        assert_eq!(RerankProvider::parse_name("bogus"), RerankProvider::Auto);
    }

    #[tokio::test]
    async fn disabled_reranker_passes_through() {
        let reranker = CrossEncoderReranker::from_config(&EngineConfig::default());
        let outcome = reranker
            .rerank("query", &candidates(5), &RerankOptions::default())
            .await;
        assert!(!outcome.metadata.reranking_applied);
        assert_eq!(outcome.results.len(), 5);
        assert_eq!(outcome.results[0].id, 0);
    }

    #[tokio::test]
    async fn single_candidate_short_circuits() {
        let reranker = enabled_local();
        let outcome = reranker
            .rerank("query", &candidates(1), &RerankOptions::default())
            .await;
        assert!(!outcome.metadata.reranking_applied);
    }

    #[tokio::test]
    async fn rerank_false_short_circuits_respecting_top_k() {
        let reranker = enabled_local();
        let opts = RerankOptions {
            rerank: false,
            top_k: Some(2),
            ..Default::default()
        };
        let outcome = reranker.rerank("query", &candidates(5), &opts).await;
        assert!(!outcome.metadata.reranking_applied);
        assert_eq!(outcome.results.len(), 2);
    }

    #[tokio::test]
    async fn local_rerank_orders_by_relevance() {
        let reranker = enabled_local();
        let docs = vec![
            RerankCandidate {
                id: 1,
                content: "nothing relevant here at all, padding padding padding padding padding"
                    .to_string(),
            },
            RerankCandidate {
                id: 2,
                content: "reciprocal rank fusion combines ranked retrieval lists; fusion is \
                          rank based and needs no score normalization at all"
                    .to_string(),
            },
        ];
        let outcome = reranker
            .rerank("rank fusion", &docs, &RerankOptions::default())
            .await;
        assert!(outcome.metadata.reranking_applied);
        assert_eq!(outcome.results[0].id, 2);
        assert_eq!(outcome.metadata.provider.as_deref(), Some("local"));
    }

    #[tokio::test]
    async fn second_identical_call_hits_cache() {
        let reranker = enabled_local();
        let docs = candidates(3);
        let first = reranker.rerank("q", &docs, &RerankOptions::default()).await;
        assert!(!first.metadata.cache_hit);
        let second = reranker.rerank("q", &docs, &RerankOptions::default()).await;
        assert!(second.metadata.cache_hit);
        assert_eq!(
            first.results.iter().map(|r| r.id).collect::<Vec<_>>(),
            second.results.iter().map(|r| r.id).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn slow_sessions_trip_the_circuit_breaker() {
        let reranker = CrossEncoderReranker::simulated(600.0);

        // Distinct queries so the cache never short-circuits latency tracking.
        for i in 0..30 {
            let _ = reranker
                .rerank(&format!("query {i}"), &candidates(5), &RerankOptions::default())
                .await;
        }

        let outcome = reranker
            .rerank("one more", &candidates(5), &RerankOptions::default())
            .await;
        assert!(!outcome.metadata.reranking_applied);
        assert!(outcome.metadata.session_disabled);
        assert!(outcome
            .metadata
            .disable_reason
            .as_deref()
            .unwrap()
            .contains("P95"));

        // reset_session clears the breaker.
        reranker.reset_session();
        let after_reset = reranker
            .rerank("fresh", &candidates(5), &RerankOptions::default())
            .await;
        assert!(after_reset.metadata.reranking_applied || !after_reset.metadata.session_disabled);
    }

    #[tokio::test]
    async fn max_candidates_caps_the_window() {
        let reranker = enabled_local();
        let opts = RerankOptions {
            max_candidates: 3,
            ..Default::default()
        };
        let outcome = reranker.rerank("document", &candidates(10), &opts).await;
        assert!(outcome.metadata.reranking_applied);
        assert_eq!(outcome.results.len(), 3);
    }
}
