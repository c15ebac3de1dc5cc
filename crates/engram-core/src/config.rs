//! Engine configuration
//!
//! All runtime toggles come from the environment, read once at startup.
//! Tests construct [`EngineConfig`] directly instead of mutating the
//! process environment.

use crate::search::reranker::RerankProvider;

/// Default TTL for session dedup entries (24 hours).
pub const DEFAULT_SENT_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Default cap on dedup entries tracked per session.
pub const DEFAULT_MAX_SENT_PER_SESSION: usize = 500;

/// Process-wide engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `SPECKIT_EAGER_WARMUP`: initialize the embedding provider at startup.
    pub eager_warmup: bool,
    /// `SPECKIT_RELATIONS` / `ENABLE_RELATIONS`: gate corrections and causal edges.
    pub relations_enabled: bool,
    /// `ENABLE_FUZZY_MATCH`: query expansion on lexical search.
    pub fuzzy_match_enabled: bool,
    /// `ENABLE_CROSS_ENCODER`: second-stage reranking.
    pub cross_encoder_enabled: bool,
    /// `CROSS_ENCODER_PROVIDER`: voyage, cohere, local, or auto.
    pub cross_encoder_provider: RerankProvider,
    pub voyage_api_key: Option<String>,
    pub cohere_api_key: Option<String>,
    /// Session dedup entry TTL in milliseconds.
    pub sent_ttl_ms: i64,
    /// Maximum dedup entries per session before oldest-first eviction.
    pub max_sent_per_session: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            eager_warmup: false,
            relations_enabled: false,
            fuzzy_match_enabled: true,
            cross_encoder_enabled: false,
            cross_encoder_provider: RerankProvider::Auto,
            voyage_api_key: None,
            cohere_api_key: None,
            sent_ttl_ms: DEFAULT_SENT_TTL_MS,
            max_sent_per_session: DEFAULT_MAX_SENT_PER_SESSION,
        }
    }
}

impl EngineConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self {
            eager_warmup: env_flag("SPECKIT_EAGER_WARMUP", false),
            relations_enabled: env_flag("SPECKIT_RELATIONS", false)
                || env_flag("ENABLE_RELATIONS", false),
            fuzzy_match_enabled: env_flag("ENABLE_FUZZY_MATCH", true),
            cross_encoder_enabled: env_flag("ENABLE_CROSS_ENCODER", false),
            cross_encoder_provider: std::env::var("CROSS_ENCODER_PROVIDER")
                .ok()
                .map(|v| RerankProvider::parse_name(&v))
                .unwrap_or(RerankProvider::Auto),
            voyage_api_key: non_empty_env("VOYAGE_API_KEY"),
            cohere_api_key: non_empty_env("COHERE_API_KEY"),
            sent_ttl_ms: DEFAULT_SENT_TTL_MS,
            max_sent_per_session: DEFAULT_MAX_SENT_PER_SESSION,
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
