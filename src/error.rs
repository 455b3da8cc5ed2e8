//! Error types for the metadata caching engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the caching engine
///
/// Only [`Error::ConfigValidation`] is ever returned from the cache, warming
/// or monitoring operations themselves. The other variants are produced by
/// ports and adapters and are absorbed into counters and logs before they
/// can reach a reader.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Backend Errors
    // =========================================================================
    /// Key-value backend connection or operation failure
    #[error("Cache backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Redis protocol or connection error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    // =========================================================================
    // Source-of-Truth Errors
    // =========================================================================
    /// Loader fetch or query failed
    #[error("Loader failure for {kind} '{id}': {reason}")]
    LoaderFailure {
        kind: String,
        id: String,
        reason: String,
    },

    /// HTTP transport error talking to the source of truth
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid threshold or strategy update
    #[error("Invalid configuration: {0}")]
    ConfigValidation(String),

    /// Configuration file could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// Duration parse error
    #[error("Failed to parse duration: {0}")]
    DurationParse(String),

    // =========================================================================
    // Encoding Errors
    // =========================================================================
    /// Cached value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a loader failure for the given entity.
    pub fn loader(
        kind: impl std::fmt::Display,
        id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::LoaderFailure {
            kind: kind.to_string(),
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors that come from the key-value backend.
    pub fn is_backend(&self) -> bool {
        matches!(self, Error::BackendUnavailable(_) | Error::Redis(_))
    }
}
