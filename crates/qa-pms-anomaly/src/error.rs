//! Error types for the anomaly detection engine's crate boundary.
//!
//! Internal code propagates `anyhow::Error`; this enum is the typed surface
//! callers outside the crate are expected to match on.

/// Errors surfaced at the `qa-pms-anomaly` public API boundary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration failed validation (e.g. weights not summing to 1.0).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An outbound HTTP request (GitHub API, summarizer backend) failed.
    #[error("external fetch failed: {0}")]
    ExternalFetch(#[from] reqwest::Error),

    /// A round-trip against the key-value store failed.
    #[error("store error: {0}")]
    Store(#[from] redis::RedisError),

    /// Serializing or deserializing a stored value failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An internal invariant was violated; wraps lower-level context.
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

/// Result alias for fallible operations at the engine's public boundary.
pub type EngineResult<T> = Result<T, EngineError>;
