//! Error types for the project storage

use rusqlite::ffi;
use thiserror::Error;

use crate::storage::ids::{SourceContextId, SourceId};

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source context id {0} does not exist")]
    SourceContextIdDoesNotExist(SourceContextId),

    #[error("Source id {0} does not exist")]
    SourceIdDoesNotExist(SourceId),

    #[error("Invalid source path: {0}")]
    InvalidSourcePath(String),

    #[error("Unknown access semantics value: {0}")]
    UnknownAccessSemantics(i64),
}

impl StorageError {
    /// True if a concurrent writer got there first: a uniqueness violation
    /// on insert, or a busy/locked database while upgrading to a write lock.
    pub fn is_insert_conflict(&self) -> bool {
        match self {
            StorageError::Sqlite(rusqlite::Error::SqliteFailure(error, _)) => {
                match error.code {
                    ffi::ErrorCode::ConstraintViolation => matches!(
                        error.extended_code,
                        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    ),
                    ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked => true,
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(extended_code: i32) -> StorageError {
        StorageError::Sqlite(rusqlite::Error::SqliteFailure(
            ffi::Error::new(extended_code),
            None,
        ))
    }

    #[test]
    fn test_unique_violation_is_conflict() {
        assert!(sqlite_failure(ffi::SQLITE_CONSTRAINT_UNIQUE).is_insert_conflict());
        assert!(sqlite_failure(ffi::SQLITE_BUSY).is_insert_conflict());
        assert!(sqlite_failure(ffi::SQLITE_BUSY_SNAPSHOT).is_insert_conflict());
    }

    #[test]
    fn test_foreign_key_violation_is_not_conflict() {
        assert!(!sqlite_failure(ffi::SQLITE_CONSTRAINT_FOREIGNKEY).is_insert_conflict());
        assert!(!StorageError::SourceIdDoesNotExist(SourceId::new(3)).is_insert_conflict());
    }
}
