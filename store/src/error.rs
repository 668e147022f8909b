//! Error types for store operations.
//!
//! Every failure carries enough context (migration id, table, file path)
//! to be shown to a user as-is.

use std::io;
use std::path::Path;

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A file, migration definition, table or record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid or empty operation input, such as a migration without SQL.
    #[error("configuration error: {0}")]
    Config(String),

    /// A destructive operation was blocked by an existing artifact.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Underlying SQLite open/query/exec failure.
    #[error("{context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Import data failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// A verify or integrity step detected structural corruption.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Filesystem failure.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Structured export encoding/decoding failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns a closure wrapping a SQLite error with `context`, for `map_err`.
    pub(crate) fn storage(context: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> Self {
        let context = context.into();
        move |source| Self::Storage { context, source }
    }

    /// Returns a closure wrapping an I/O error with `context`, for `map_err`.
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let context = context.into();
        move |source| Self::Io { context, source }
    }

    pub(crate) fn missing_file(kind: &str, path: &Path) -> Self {
        Self::NotFound(format!("{kind} not found: {}", path.display()))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(source: rusqlite::Error) -> Self {
        Self::Storage {
            context: "database error".to_string(),
            source,
        }
    }
}

impl From<gogo_core::ValidationError> for StoreError {
    fn from(err: gogo_core::ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Convenience alias for results with [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;
