// 🚨 Import Errors
// Run-level failures only. Cell-level parse problems never reach this type:
// parsers return None and log instead.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Coarse failure category reported to callers polling a run.
///
/// `Timeout` is kept apart so a caller can suggest a smaller file or a retry
/// instead of a generic "import failed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Caller supplied a bad year/month or file name
    Parameter,
    /// Staging conversion or schema discovery ran out of time
    Timeout,
    /// Source spreadsheet missing, unreadable or without a main sheet
    Source,
    /// Store or serialization failure
    Internal,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("source file unreadable: {path}: {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("staging conversion timed out after {seconds}s ({path}) - file too large or corrupted")]
    StagingTimeout { path: PathBuf, seconds: u64 },

    #[error("schema discovery timed out after {seconds}s")]
    SchemaTimeout { seconds: u64 },

    #[error("staging failed: {0}")]
    Staging(String),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("could not resolve {entity} '{key}' after a uniqueness conflict")]
    UnresolvedConflict { entity: &'static str, key: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("status store error: {0}")]
    Status(String),
}

impl ImportError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ImportError::InvalidParameter(_) | ImportError::Config(_) => FailureKind::Parameter,
            ImportError::StagingTimeout { .. } | ImportError::SchemaTimeout { .. } => {
                FailureKind::Timeout
            }
            ImportError::SourceUnreadable { .. } | ImportError::Spreadsheet(_) => {
                FailureKind::Source
            }
            ImportError::Staging(_)
            | ImportError::Database(_)
            | ImportError::UnresolvedConflict { .. }
            | ImportError::Io(_)
            | ImportError::Serialization(_)
            | ImportError::Status(_) => FailureKind::Internal,
        }
    }

    /// Errors that leave the store unusable for the rest of the run.
    ///
    /// Anything else raised while processing one row only costs that row.
    pub fn is_fatal_for_run(&self) -> bool {
        match self {
            ImportError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::CannotOpen
                    | rusqlite::ErrorCode::DiskFull
                    | rusqlite::ErrorCode::ReadOnly
                    | rusqlite::ErrorCode::SystemIoFailure
                    | rusqlite::ErrorCode::DatabaseCorrupt
                    | rusqlite::ErrorCode::NotADatabase
            ),
            ImportError::Io(_) => true,
            _ => false,
        }
    }
}

impl From<polars::prelude::PolarsError> for ImportError {
    fn from(err: polars::prelude::PolarsError) -> Self {
        ImportError::Staging(err.to_string())
    }
}

impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::Spreadsheet(err.to_string())
    }
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::Spreadsheet(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_distinguishable() {
        let err = ImportError::StagingTimeout {
            path: PathBuf::from("08_2025.ods"),
            seconds: 1200,
        };
        assert_eq!(err.failure_kind(), FailureKind::Timeout);
        assert!(err.to_string().contains("timed out"));

        let err = ImportError::InvalidParameter("month 13".to_string());
        assert_eq!(err.failure_kind(), FailureKind::Parameter);
    }

    #[test]
    fn test_constraint_violation_is_not_fatal() {
        let err = ImportError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        ));
        assert!(!err.is_fatal_for_run());

        let err = ImportError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
            None,
        ));
        assert!(err.is_fatal_for_run());
    }
}
