//! Error types for SyncDrop

use std::fmt;

use thiserror::Error;

/// Main error type for SyncDrop operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// The local store could not be opened for this session
    #[error("Local store unavailable: {0}")]
    LocalUnavailable(String),

    /// Unknown collection identifier
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// Unknown drop type
    #[error("Unknown drop type: {0}")]
    UnknownDropType(String),

    /// Error during storage operations (redb)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Remote backend rejected or failed a request
    #[error("Remote error: {0}")]
    Remote(String),

    /// Guest data could not be moved into the account
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Classifier backend failed
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid operation for current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Coarse classification of a [`SyncError`], for callers that want to show
/// a transient error state without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The store could not be opened
    Initialization,
    /// A listing failed
    Read,
    /// An insert, update or delete failed
    Write,
    /// Guest-to-account migration failed; local data is untouched
    Migration,
    /// Classifier unreachable or returned garbage
    Classifier,
    /// Caller passed something the core cannot accept
    InvalidInput,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Initialization => "initialization",
            ErrorKind::Read => "read",
            ErrorKind::Write => "write",
            ErrorKind::Migration => "migration",
            ErrorKind::Classifier => "classifier",
            ErrorKind::InvalidInput => "invalid input",
        };
        f.write_str(s)
    }
}

impl SyncError {
    /// Classify this error.
    ///
    /// Storage and remote errors are reported as [`ErrorKind::Write`]; call
    /// sites on a read path use [`SyncError::read_kind`] instead.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::LocalUnavailable(_) | SyncError::Database(_) => ErrorKind::Initialization,
            SyncError::UnknownCollection(_)
            | SyncError::UnknownDropType(_)
            | SyncError::InvalidOperation(_) => ErrorKind::InvalidInput,
            SyncError::Migration(_) => ErrorKind::Migration,
            SyncError::Classifier(_) => ErrorKind::Classifier,
            SyncError::Storage(_)
            | SyncError::Transaction(_)
            | SyncError::Table(_)
            | SyncError::StorageOp(_)
            | SyncError::Commit(_)
            | SyncError::Serialization(_)
            | SyncError::Remote(_)
            | SyncError::Io(_) => ErrorKind::Write,
        }
    }

    /// Classify this error as it surfaced from a listing.
    pub fn read_kind(&self) -> ErrorKind {
        match self.kind() {
            ErrorKind::Write => ErrorKind::Read,
            other => other,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Remote(e.to_string())
    }
}

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::UnknownCollection("misc".to_string());
        assert_eq!(format!("{}", err), "Unknown collection: misc");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let sync_err: SyncError = io_err.into();
        assert!(matches!(sync_err, SyncError::Io(_)));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            SyncError::LocalUnavailable("locked".into()).kind(),
            ErrorKind::Initialization
        );
        assert_eq!(SyncError::Remote("503".into()).kind(), ErrorKind::Write);
        assert_eq!(SyncError::Remote("503".into()).read_kind(), ErrorKind::Read);
        assert_eq!(
            SyncError::Migration("bulk insert".into()).read_kind(),
            ErrorKind::Migration
        );
        assert_eq!(
            SyncError::UnknownCollection("trash".into()).kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::InvalidInput.to_string(), "invalid input");
    }
}
