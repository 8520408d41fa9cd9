//! Local store error types.

use thiserror::Error;

/// Local store error type.
///
/// Every variant is recoverable: callers log it and decide whether the
/// surrounding operation can proceed. None of them should ever crash the app.
#[derive(Debug, Error)]
pub enum LocalStoreError {
    /// SQLite failure (disk full, locked, I/O).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// An entity could not be encoded.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A stored collection document could not be decoded.
    #[error("corrupt collection {collection}: {reason}")]
    Corrupt {
        collection: &'static str,
        reason: String,
    },

    /// Filesystem error while preparing the store location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend refused the write (e.g. quota exceeded).
    #[error("backend error: {0}")]
    Backend(String),
}

impl LocalStoreError {
    /// Create a Backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Local store result type.
pub type LocalResult<T> = Result<T, LocalStoreError>;
