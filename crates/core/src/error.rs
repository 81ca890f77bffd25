//! Unified error types for chordcache.
//!
//! Lookups resolve normalization and corruption problems to "not found", so
//! most of these only surface from writes or from the storage layer itself.

use tokio_rusqlite::rusqlite;

/// Unified error type for the cache engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller input is missing required identity fields.
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Neither the configured store nor the in-memory fallback could be opened.
    #[error("STORAGE_UNAVAILABLE: {0}")]
    StorageUnavailable(String),

    /// A stored value failed validation on read.
    #[error("RECORD_CORRUPT: {0}")]
    RecordCorrupt(String),

    /// A single search payload is larger than the whole byte budget.
    #[error("CAPACITY_EXCEEDED: entry is {size} bytes, budget is {max} bytes")]
    CapacityExceeded { size: usize, max: usize },

    /// Another duplicate cleanup pass is already running.
    #[error("CLEANUP_IN_PROGRESS")]
    CleanupInProgress,

    /// An external chord-sheet or search source failed.
    #[error("SOURCE_ERROR: {0}")]
    Source(#[source] crate::source::SourceError),

    /// Result payload could not be (de)serialized.
    #[error("SERIALIZATION_ERROR: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the underlying connection reported itself closed.
    ///
    /// The connection manager drops its memoized handle when this is true.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Error::Database(tokio_rusqlite::Error::ConnectionClosed | tokio_rusqlite::Error::Close(_)))
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
