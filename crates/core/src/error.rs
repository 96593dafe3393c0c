//! Unified error types for panorama.
//!
//! Every variant renders with a stable `CODE:` prefix so callers can
//! classify failures without matching on the Rust type.

use std::sync::Arc;

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error type shared by the cache, query and server crates.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., an empty table name).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// A request referenced a column the target table does not expose.
    #[error("INVALID_COLUMN: {column} is not available on {table}")]
    InvalidColumn { table: String, column: String },

    /// A post-aggregation expression failed validation.
    #[error("INVALID_EXPRESSION: {0}")]
    InvalidExpression(String),

    /// Durable client store operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Cached payload could not be encoded or decoded.
    #[error("CACHE_ERROR: serialization failed: {0}")]
    Serialization(String),

    /// A statement against the analytics database failed.
    #[error("QUERY_FAILED: {0}")]
    QueryFailed(String),

    /// A pooled database connection could not be created or checked out.
    #[error("CONNECTION_FAILED: {0}")]
    ConnectionFailed(String),

    /// The in-flight fetch this caller attached to failed.
    #[error("FETCH_FAILED: {0}")]
    Upstream(Arc<Error>),

    /// Network fetch timed out.
    #[error("FETCH_TIMEOUT: {0}")]
    FetchTimeout(String),

    /// HTTP error response or transport failure.
    #[error("HTTP_ERROR: {0}")]
    HttpError(String),
}

impl Error {
    /// Shorthand for [`Error::InvalidColumn`].
    pub fn invalid_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Error::InvalidColumn { table: table.into(), column: column.into() }
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<Arc<Error>> for Error {
    fn from(err: Arc<Error>) -> Self {
        Error::Upstream(err)
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::InvalidInput(_) | Error::InvalidColumn { .. } | Error::InvalidExpression(_) => -32602,
            Error::Database(_) | Error::MigrationFailed(_) | Error::Serialization(_) => -32002,
            Error::QueryFailed(_) => -32003,
            Error::ConnectionFailed(_) => -32004,
            Error::Upstream(_) => -32005,
            Error::FetchTimeout(_) => -32006,
            Error::HttpError(_) => -32008,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}
