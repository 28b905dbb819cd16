//! Error enums shared across the workspace.

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    /// Unique constraint violated (external hash, email, participant pair).
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store timed out after {0}ms")]
    Timeout(u64),
    #[error("store error: {0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("cache timed out after {0}ms")]
    Timeout(u64),
    #[error("cache error: {0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("missing claim: {0}")]
    MissingClaim(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("generator error: {0}")]
    Other(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Errors surfaced by the identity, access, and memory operations.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("invalid token: {0}")]
    InvalidToken(#[from] TokenError),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("access denied")]
    AccessDenied,
    #[error("user already exists: {0}")]
    UserAlreadyExists(String),
    #[error("storage: {0}")]
    Storage(#[from] StoreError),
    #[error("generation: {0}")]
    Generation(#[from] GeneratorError),
}
