//! Engine error type

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Bad caller input; never mutates state
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// Unknown memory / correction / session id
    #[error("Not found: {0}")]
    NotFound(String),
    /// CHECK or FK rejection surfaced as a clean message
    #[error("Integrity violation: {0}")]
    Integrity(String),
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// IO error (checkpoint files, backups)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// External dependency degraded (embedding provider, reranker)
    #[error("External dependency failed: {0}")]
    External(String),
    /// Engine refuses to start (storage unreadable, schema too new)
    #[error("Fatal: {0}")]
    Fatal(String),
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;
