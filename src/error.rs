//! Error types for the memory engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, MemoriaError>;

/// Sub-kinds of LLM/embedding failures (spec §4.2, §4.10)
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("rate limited, retry after {0}s")]
    RateLimited(u64),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("invalid response from provider: {0}")]
    InvalidResponse(String),
}

/// Main error type for the memory engine
///
/// Mirrors the taxonomy in spec §7: kinds are stable and a protocol adapter
/// can map them 1:1 onto its own wire error codes via [`MemoriaError::code`].
#[derive(Error, Debug)]
pub enum MemoriaError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("input too large: {0}")]
    TooLarge(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("transient storage error: {0}")]
    TransientStorage(String),

    #[error("permanent storage error: {0}")]
    PermanentStorage(String),

    #[error("llm error: {0}")]
    Llm(#[from] LlmError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    #[cfg(feature = "openai")]
    Http(#[from] reqwest::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl MemoriaError {
    /// Whether the engine should retry this error internally (spec §4.10)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MemoriaError::TransientStorage(_)
                | MemoriaError::Llm(LlmError::RateLimited(_))
                | MemoriaError::Llm(LlmError::Unavailable(_))
        )
    }

    /// Stable numeric code for a protocol adapter to map onto its own wire format.
    ///
    /// Negative codes follow the JSON-RPC reserved-range convention the pack's
    /// MCP-style servers use, without this crate committing to that protocol.
    pub fn code(&self) -> i64 {
        match self {
            MemoriaError::InvalidInput(_) => -32602,
            MemoriaError::NotFound(_) => -32001,
            MemoriaError::AccessDenied(_) => -32003,
            MemoriaError::Conflict(_) => -32005,
            MemoriaError::TooLarge(_) => -32007,
            MemoriaError::Unavailable(_) => -32008,
            MemoriaError::Cancelled => -32009,
            MemoriaError::Llm(LlmError::RateLimited(_)) => -32004,
            _ => -32000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(MemoriaError::TransientStorage("timeout".into()).is_retryable());
        assert!(MemoriaError::Llm(LlmError::RateLimited(1)).is_retryable());
        assert!(!MemoriaError::InvalidInput("bad".into()).is_retryable());
        assert!(!MemoriaError::Llm(LlmError::InvalidResponse("x".into())).is_retryable());
    }

    #[test]
    fn stable_codes() {
        assert_eq!(MemoriaError::NotFound("x".into()).code(), -32001);
        assert_eq!(MemoriaError::Cancelled.code(), -32009);
    }
}
