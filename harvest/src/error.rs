//! Structured errors for the harvesting engine.
//!
//! Follows the shape used elsewhere in this codebase for boundary-facing
//! errors: a stable `code`, a human `message`, a `retryable` flag, and
//! free-form `details` pairs for diagnostics.

use std::fmt;

/// Stable identifiers for the kinds of failure the engine can report.
///
/// Kept small and closed (unlike an open string) so callers can match on it
/// without string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    DatabaseUnavailable,
    CacheRootUnwritable,
    StorageIo,
    InvalidConfig,
}

impl ErrorCode {
    #[must_use]
    pub fn default_retryable(self) -> bool {
        match self {
            ErrorCode::DatabaseUnavailable | ErrorCode::StorageIo => true,
            ErrorCode::CacheRootUnwritable | ErrorCode::InvalidConfig => false,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::DatabaseUnavailable => "database_unavailable",
            ErrorCode::CacheRootUnwritable => "cache_root_unwritable",
            ErrorCode::StorageIo => "storage_io",
            ErrorCode::InvalidConfig => "invalid_config",
        };
        f.write_str(s)
    }
}

/// Key/value diagnostic pairs attached to an error, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ErrorDetails(pub Vec<(String, String)>);

impl ErrorDetails {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }
}

/// Top-level error for the engine. Only raised for the two conditions the
/// spec treats as fatal at startup: an unreachable database or an
/// unwritable cache root. Everything else is recovered locally and surfaced
/// through return values (empty lookup, skipped store, denied admission).
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct HarvestError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    pub details: ErrorDetails,
}

impl HarvestError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            retryable: code.default_retryable(),
            message: message.into(),
            details: ErrorDetails::new(),
        }
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details = self.details.with(key, value);
        self
    }
}

impl From<rusqlite::Error> for HarvestError {
    fn from(err: rusqlite::Error) -> Self {
        HarvestError::new(ErrorCode::DatabaseUnavailable, err.to_string())
    }
}

impl From<std::io::Error> for HarvestError {
    fn from(err: std::io::Error) -> Self {
        HarvestError::new(ErrorCode::CacheRootUnwritable, err.to_string())
    }
}

/// Internal error surfaced by cache/limiter storage calls. Never escapes the
/// public API directly: the cache and coordinator catch it and fold it into
/// a miss, a skipped store, or a denied admission, logging a warning first.
#[derive(Debug, thiserror::Error)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError(err.to_string())
    }
}
