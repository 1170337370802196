//! Error types for the sentence store.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for sentence store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in the sentence store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A cache slot is absent when a read is attempted.
    #[error("cache slot not found: {}", slot.display())]
    NotFound { slot: PathBuf },

    /// A cache slot exists but cannot be decoded.
    #[error("corrupt cache slot {}: {reason}", slot.display())]
    Corrupt { slot: PathBuf, reason: String },

    /// Invalid arguments from the caller.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Provider not configured.
    #[error("embedding provider not configured")]
    ProviderNotConfigured,

    /// API request failed.
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// Invalid response from provider.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A local embedding model failed to load or run.
    #[error("embedding model error: {0}")]
    Model(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Document type that no sentence source can read.
    #[error("unsupported document: {0}")]
    UnsupportedDocument(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Vector slot could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::error::EncodeError),

    /// Configuration file could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl StoreError {
    /// Build a `Corrupt` error for the given slot.
    pub fn corrupt(slot: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Corrupt {
            slot: slot.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error means the cache entry is simply absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
