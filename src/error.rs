//! Error types.
//!
//! Provider failures are recoverable inside the router (refund and advance to
//! the next candidate); ledger and cache errors only surface through the
//! persistence and maintenance APIs. Classification and affordability never
//! produce errors.

use std::time::Duration;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for library entry points that touch several subsystems.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Failure reported by a provider adapter.
///
/// The router treats every variant the same way: refund the debited credit
/// and try the next distinct provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed output: {0}")]
    MalformedOutput(String),

    #[error("task not supported: {0}")]
    Unsupported(String),

    #[error("cancelled")]
    Cancelled,
}

/// Credit ledger persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result cache errors. Lookups never return these; corrupt entries are
/// misses.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Settings load/save and dotted-path edit errors.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Invalid value for {path}: {message}")]
    InvalidValue { path: String, message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}
