//! # Store Errors

use thiserror::Error;

use crate::conflict::Conflict;
use crate::record::{Bill, RecordId, ValidationError};

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the remote store
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Record does not exist (or is soft-deleted)
    #[error("Record not found: {0}")]
    NotFound(RecordId),

    /// Caller may not modify the record
    #[error("Not authorized to modify record {0}")]
    Unauthorized(RecordId),

    /// Store could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Transaction gave up without writing
    #[error("Transaction aborted: {0}")]
    Aborted(TxAbort),
}

/// Why a transaction aborted. No write occurs in any of these cases.
#[derive(Debug, Clone, Error)]
pub enum TxAbort {
    /// Server moved on and the difference is not auto-resolvable
    #[error("conflicting edit ({severity} severity)", severity = .conflict.severity)]
    Conflict {
        conflict: Box<Conflict>,
        server: Box<Bill>,
    },

    /// Create targeted an id that is already taken
    #[error("record {0} already exists")]
    AlreadyExists(RecordId),

    /// Write carried a version other than the next one
    #[error("version {proposed} rejected, expected {expected}")]
    VersionRejected { expected: u64, proposed: u64 },

    /// Snapshot failed business validation
    #[error("{0}")]
    Invalid(ValidationError),
}

impl StoreError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::Aborted(TxAbort::Conflict { .. }) => "CONFLICT_DETECTED",
            Self::Aborted(_) => "ABORTED",
        }
    }

    pub(crate) fn lock_poisoned() -> Self {
        Self::Unavailable("Lock poisoned".into())
    }
}
