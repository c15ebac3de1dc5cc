//! Embedding provider interface
//!
//! Embeddings are consumed, not learned: the engine talks to an external
//! provider through [`EmbeddingProvider`] and tolerates its absence. A memory
//! written while no provider is available stays `embedding_status=pending`
//! and is served by the lexical paths only.
//!
//! Provider initialization is deferred until the first `embed` call;
//! `SPECKIT_EAGER_WARMUP=true` forces init at startup via [`EmbeddingService::warmup`].

use std::sync::Mutex;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding error type
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    /// No provider configured or init failed
    #[error("Embedding provider unavailable: {0}")]
    Unavailable(String),
    /// Transient provider failure
    #[error("Embedding provider error: {0}")]
    Provider(String),
    /// Vector with unexpected dimensions
    #[error("Invalid dimensions: expected {expected}, got {got}")]
    Dimensions { expected: usize, got: usize },
}

// ============================================================================
// PROVIDER CONTRACT
// ============================================================================

/// Maps text to a fixed-dimension dense vector.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text. May fail transiently.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Output dimensionality; constant for the provider's lifetime.
    fn dimensions(&self) -> usize;
}

/// Deferred provider constructor. Called at most once, on first use.
pub type ProviderFactory =
    Box<dyn Fn() -> Result<Box<dyn EmbeddingProvider>, EmbeddingError> + Send + Sync>;

enum ProviderState {
    Uninitialized(Option<ProviderFactory>),
    Ready(Box<dyn EmbeddingProvider>),
    Failed(String),
}

/// Lazily-initialized provider handle.
///
/// The service is the process-wide seam between the engine and whatever
/// model backs it; tests swap in closures.
pub struct EmbeddingService {
    state: Mutex<ProviderState>,
}

impl EmbeddingService {
    /// Create a service that builds its provider on first use.
    pub fn new(factory: ProviderFactory) -> Self {
        Self {
            state: Mutex::new(ProviderState::Uninitialized(Some(factory))),
        }
    }

    /// A service with no provider; every `embed` returns `Unavailable`.
    pub fn disabled() -> Self {
        Self {
            state: Mutex::new(ProviderState::Failed("no provider configured".to_string())),
        }
    }

    /// Wrap an already-constructed provider (tests, eager setups).
    pub fn with_provider(provider: Box<dyn EmbeddingProvider>) -> Self {
        Self {
            state: Mutex::new(ProviderState::Ready(provider)),
        }
    }

    /// Force provider construction now instead of on first `embed`.
    pub fn warmup(&self) {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => return,
        };
        if let ProviderState::Uninitialized(factory) = &mut *state {
            let factory = factory.take();
            *state = match factory.map(|f| f()) {
                Some(Ok(provider)) => {
                    tracing::info!(dimensions = provider.dimensions(), "embedding provider warmed up");
                    ProviderState::Ready(provider)
                }
                Some(Err(e)) => {
                    tracing::warn!("embedding provider warmup failed: {e}");
                    ProviderState::Failed(e.to_string())
                }
                None => ProviderState::Failed("provider factory missing".to_string()),
            };
        }
    }

    /// Whether a provider is initialized and usable.
    pub fn is_ready(&self) -> bool {
        matches!(
            self.state.lock().as_deref(),
            Ok(ProviderState::Ready(_))
        )
    }

    /// Embed one text, initializing the provider if needed.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.warmup();
        let state = self
            .state
            .lock()
            .map_err(|_| EmbeddingError::Unavailable("provider lock poisoned".to_string()))?;
        match &*state {
            ProviderState::Ready(provider) => provider.embed(text),
            ProviderState::Failed(reason) => Err(EmbeddingError::Unavailable(reason.clone())),
            ProviderState::Uninitialized(_) => {
                Err(EmbeddingError::Unavailable("provider not initialized".to_string()))
            }
        }
    }

    /// Provider dimensionality, when ready.
    pub fn dimensions(&self) -> Option<usize> {
        match self.state.lock().as_deref() {
            Ok(ProviderState::Ready(p)) => Some(p.dimensions()),
            _ => None,
        }
    }
}

// ============================================================================
// STORED VECTORS
// ============================================================================

/// A stored embedding vector with its provenance.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub dimensions: usize,
    pub model: String,
}

impl Embedding {
    /// Serialize to little-endian f32 bytes for BLOB storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.vector.len() * 4);
        for v in &self.vector {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes
    }

    /// Deserialize from BLOB bytes. Returns `None` on a ragged length.
    pub fn from_bytes(bytes: &[u8], model: &str) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let vector: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let dimensions = vector.len();
        Some(Self {
            vector,
            dimensions,
            model: model.to_string(),
        })
    }
}

/// Cosine similarity between two vectors. Zero-magnitude inputs score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

// ============================================================================
// TESTS
// ============================================================================
